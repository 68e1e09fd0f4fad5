/// Column-name and code constants for the circkit tables.
/// Single source of truth for every frame the pipeline reads or writes.

// ── Raw production table (long layout, one indicator per row) ───────────────
pub mod production {
    pub const PRODUCT_CODE: &str = "product_code";
    pub const COUNTRY_CODE: &str = "country_code";
    pub const INDICATOR: &str = "indicator";
    pub const VALUE: &str = "value";
}

/// Indicator kinds carried by the raw production table. Besides the
/// production figures it embeds a secondary set of trade figures which the
/// merge step uses as fallback values.
pub mod production_indicator {
    pub const PROD_QTY: &str = "PRODQNT";
    pub const PROD_VAL: &str = "PRODVAL";
    pub const UNIT: &str = "QNTUNIT";
    pub const IMP_QTY: &str = "IMPQNT";
    pub const IMP_VAL: &str = "IMPVAL";
    pub const EXP_QTY: &str = "EXPQNT";
    pub const EXP_VAL: &str = "EXPVAL";
}

// ── Raw trade table ─────────────────────────────────────────────────────────
pub mod trade {
    pub const HS_CODE: &str = "hs_code";
    pub const REPORTER: &str = "reporter_geo";
    pub const FLOW: &str = "flow";
    pub const INDICATOR: &str = "indicator";
    pub const VALUE: &str = "value";
}

pub mod trade_flow {
    pub const IMPORT: &str = "import";
    pub const EXPORT: &str = "export";
}

pub mod trade_indicator {
    pub const QTY_KG: &str = "quantity_kg";
    pub const VALUE: &str = "value";
}

// ── Record rows (harmonized, merged and indicator tables) ───────────────────
pub mod record {
    pub const PRODUCT_KEY: &str = "product_key";
    pub const PRODUCT_CODE: &str = "product_code";
    pub const GEO: &str = "geo";
    pub const LEVEL: &str = "level";
    pub const YEAR: &str = "year";

    pub const PROD_QTY: &str = "prod_qty_t";
    pub const PROD_VAL: &str = "prod_val";
    pub const IMP_QTY: &str = "imp_qty_t";
    pub const IMP_VAL: &str = "imp_val";
    pub const EXP_QTY: &str = "exp_qty_t";
    pub const EXP_VAL: &str = "exp_val";

    /// Secondary trade figures carried from the production source until the
    /// fallback stage consumes them.
    pub const SEC_IMP_QTY: &str = "sec_imp_qty_t";
    pub const SEC_IMP_VAL: &str = "sec_imp_val";
    pub const SEC_EXP_QTY: &str = "sec_exp_qty_t";
    pub const SEC_EXP_VAL: &str = "sec_exp_val";

    pub const AC_QTY: &str = "ac_qty_t";
    pub const AC_VAL: &str = "ac_val";

    pub const FLAG_NEGATIVE_AC: &str = "flag_negative_ac";
    pub const FLAG_TRADE_RATIO: &str = "flag_trade_ratio";

    /// Additive measure columns of the merged table. Missing sides coalesce
    /// to zero for these and only these; rates and ratios never do.
    pub const ADDITIVE: [&str; 6] = [PROD_QTY, PROD_VAL, IMP_QTY, IMP_VAL, EXP_QTY, EXP_VAL];
}

pub mod level {
    pub const COUNTRY: &str = "country";
    pub const EU: &str = "eu";
}

// ── Aggregate tables ────────────────────────────────────────────────────────
pub mod aggregate {
    pub const N_PRODUCTS: &str = "n_products";
    pub const N_GEOS: &str = "n_geos";
}

// ── Unit-value table ────────────────────────────────────────────────────────
pub mod unit_value {
    pub const PROD: &str = "prod_unit_value";
    pub const IMP: &str = "imp_unit_value";
    pub const EXP: &str = "exp_unit_value";
}

// ── Mass-balance flow table ─────────────────────────────────────────────────
/// Masses arrive in Mg (megagrams); one Mg is one tonne, so no conversion
/// is applied on load.
pub mod massbalance {
    pub const YEAR: &str = "year";
    pub const LOCATION: &str = "location";
    pub const CATEGORY: &str = "waste_category";
    pub const MATERIAL: &str = "material";
    pub const FLOW_ID: &str = "flow_id";
    pub const MASS: &str = "mass_mg";
    pub const SCENARIO: &str = "scenario";
}

pub mod scenario {
    pub const OBSERVED: &str = "observed";
}

/// Flow identifiers entering the recovery-rate calculation.
pub mod flow_id {
    pub const RECOVERED: &str = "recovered";
    pub const RECYCLED: &str = "recycled";
    pub const LOST: &str = "lost";

    pub const RECOVERY: [&str; 2] = [RECOVERED, RECYCLED];
}

// ── Waste-collection statistics ─────────────────────────────────────────────
pub mod collection {
    pub const GEO: &str = "geo";
    pub const CATEGORY: &str = "waste_category";
    pub const OPERATION: &str = "operation";
    pub const UNIT: &str = "unit";
    pub const VALUE: &str = "value";

    /// Recognized collection operation codes.
    pub const OPERATIONS: [&str; 2] = ["collection", "collection_hh"];
    /// Recognized unit codes: share of generated waste, and its 3-year
    /// moving average.
    pub const UNITS: [&str; 2] = ["pc", "pc_3yavg"];
}

// ── Derived rate tables ─────────────────────────────────────────────────────
pub mod rate {
    pub const MASS: &str = "mass_t";
    /// Material share of the category's total mass.
    pub const CATEGORY_SHARE: &str = "category_share_pc";
    /// Material share of the product's total mass.
    pub const SHARE: &str = "mass_share_pc";
    pub const RECOVERY: &str = "recovery_rate_pc";
    pub const COLLECTION: &str = "collection_rate_pc";
    /// Data source provenance tag.
    pub const SOURCE: &str = "source";
    /// Year the underlying observations were taken from; differs from the
    /// processed year when the prior-year fallback kicked in.
    pub const DATA_YEAR: &str = "data_year";
}

pub mod source {
    pub const MASS_BALANCE: &str = "mass_balance";
    pub const COLLECTION_STATS: &str = "collection_stats";
}

// ── Strategy indicator table ────────────────────────────────────────────────
pub mod strategy {
    pub const STRATEGY: &str = "strategy";
    pub const RATE: &str = "rate_pc";
    pub const SAVINGS_QTY: &str = "savings_qty_t";
    pub const SAVINGS_VAL: &str = "savings_val";

    pub const REFURBISHMENT: &str = "refurbishment";
    pub const RECYCLING: &str = "recycling";
}

// ── Table names ─────────────────────────────────────────────────────────────
pub mod table {
    // Inputs, produced by the out-of-scope fetchers.
    pub const PRODUCTION_RAW: &str = "production";
    pub const TRADE_RAW: &str = "trade";
    pub const MASS_BALANCE: &str = "massbalance";
    pub const COLLECTION: &str = "collection";

    // Intermediates, dropped after the year unless retained by option.
    pub const PRODUCTION_HARMONIZED: &str = "production_harmonized";
    pub const TRADE_HARMONIZED: &str = "trade_harmonized";

    // Outputs, one set per processed year.
    pub const PRODTRADE: &str = "prodtrade";
    pub const INDICATORS: &str = "indicators";
    pub const INDICATORS_GEO: &str = "indicators_geo";
    pub const INDICATORS_PRODUCT: &str = "indicators_product";
    pub const MATERIAL_COMPOSITION: &str = "material_composition";
    pub const MATERIAL_RECOVERY: &str = "material_recovery";
    pub const COLLECTION_RATES: &str = "collection_rates";
    pub const UNIT_VALUES: &str = "unit_values";
    pub const STRATEGY: &str = "strategy";

    /// Year-qualified table name, e.g. `indicators_2019`.
    pub fn qualified(stem: &str, year: i32) -> String {
        format!("{stem}_{year}")
    }
}
