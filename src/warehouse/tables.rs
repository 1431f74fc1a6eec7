//! The sales star schema: two dimensions and one fact table.

use super::{Column, ColumnType, Distribution, ForeignKey, TableDef};

const DIM_PRODUCT: TableDef = TableDef {
    name: "dim_product",
    columns: &[
        Column::new("product_name", ColumnType::Varchar(255)),
        Column::new("category", ColumnType::Varchar(255)),
    ],
    primary_key: &["product_name"],
    foreign_keys: &[],
    distribution: Distribution::All,
    sort_key: &[],
};

const DIM_DATE: TableDef = TableDef {
    name: "dim_date",
    columns: &[
        Column::new("crawl_year", ColumnType::Int),
        Column::new("crawl_month", ColumnType::Int),
    ],
    primary_key: &["crawl_year", "crawl_month"],
    foreign_keys: &[],
    distribution: Distribution::All,
    sort_key: &[],
};

const FACT_SALES: TableDef = TableDef {
    name: "fact_sales",
    columns: &[
        Column::new("product_name", ColumnType::Varchar(255)),
        Column::new("current_discounted_price", ColumnType::Double),
        Column::new("listed_price", ColumnType::Double),
        Column::new("rating", ColumnType::Double),
        Column::new("number_of_reviews", ColumnType::Double),
        Column::new("discount_amount", ColumnType::Double),
        Column::new("discount_flag", ColumnType::Int),
        Column::new("rating_bucket", ColumnType::Varchar(50)),
        Column::new("crawl_year", ColumnType::Int),
        Column::new("crawl_month", ColumnType::Int),
    ],
    primary_key: &[],
    foreign_keys: &[
        ForeignKey {
            columns: &["product_name"],
            table: "dim_product",
            references: &["product_name"],
        },
        ForeignKey {
            columns: &["crawl_year", "crawl_month"],
            table: "dim_date",
            references: &["crawl_year", "crawl_month"],
        },
    ],
    distribution: Distribution::Key("product_name"),
    sort_key: &["crawl_year", "crawl_month"],
};

/// Tables in creation and load order; dimensions first.
pub const STAR_SCHEMA: &[TableDef] = &[DIM_PRODUCT, DIM_DATE, FACT_SALES];
