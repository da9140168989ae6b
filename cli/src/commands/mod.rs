//! CLI command implementations.

mod info;
mod pair;
mod run;
mod send;

pub use info::show_info;
pub use pair::{run_pairing, PairFlow};
pub use run::run_mesh;
pub use send::send_text;
