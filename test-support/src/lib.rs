pub mod fake_smtp;

use simplelog::{Config, LevelFilter, TestLogger};

pub fn setup_logging() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}
