mod combine;
mod init;
mod resolve;
mod run;
mod status;

pub use combine::combine_outputs;
pub use init::init_config;
pub use resolve::resolve_urls;
pub use run::{run_pipeline, RunOverrides};
pub use status::show_status;
