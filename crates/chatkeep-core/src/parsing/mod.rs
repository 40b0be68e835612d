pub mod block_parser;
pub mod math_heuristic;
pub mod table;

pub use block_parser::parse;
pub use math_heuristic::looks_like_math;
pub use table::{TableMatch, extract_table, split_table_cells};
