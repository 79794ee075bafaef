use alloc::boxed::Box;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing to the UEFI console.
///
/// The console belongs to boot services; nothing may be logged once they
/// have been exited.
pub struct UefiLogger {
    max_level: LevelFilter,
}

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Install the logger; call once during early init.
    ///
    /// # Errors
    /// A logger was already installed.
    pub fn init(self) -> Result<&'static Self, SetLoggerError> {
        let max_level = self.max_level;
        let logger: &'static Self = Box::leak(Box::new(self));
        log::set_logger(logger)?;
        log::set_max_level(max_level);
        Ok(logger)
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        uefi::println!(
            "[{}] {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
