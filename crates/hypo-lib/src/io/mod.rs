pub mod rows;

pub use rows::{parse_timestamp, read_rows, read_series_csv, write_rows_csv, write_series_csv, RowTable};
