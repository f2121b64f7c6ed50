// Reports built from fetched listings: statistics, build history, tables, CSV

pub mod csv_export;
pub mod history;
pub mod listing;
pub mod statistics;
