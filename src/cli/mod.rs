pub(crate) mod command;
pub(crate) mod discover;
pub(crate) mod scan;
pub(crate) mod ui;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::discover::DiscoverArgs;
pub use self::scan::ScanArgs;
