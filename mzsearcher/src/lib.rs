mod config;
mod driver;
mod proc;
mod progress;

pub use config::{
    AdductConfig, ConfigError, SearchConfig, SearchSettings, ToleranceConfig, ToleranceUnit,
    BUFFER_SIZE, CONFIG_FILE_NAME, ENV_PREFIX,
};
pub use driver::{init_logging, SearchReport, SearchTask, SearchTaskError};
pub use proc::{collate_results, search_spectra};
pub use progress::ProgressRecord;
