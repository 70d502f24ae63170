pub mod db;
pub mod models;
pub mod sheet_csv;
pub mod stats;
