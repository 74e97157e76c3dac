//! Methods specific to the svscout logger
//!

use camino::Utf8Path;

use crate::filenames::LOG_FILENAME;
use crate::globals::PROGRAM_NAME;
use crate::os_utils::create_dir_all;

/// If debug is true set the default logger to the more verbose debug level
///
fn setup_logger(output_dir: Option<&Utf8Path>, debug: bool) -> Result<(), fern::InitError> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                PROGRAM_NAME,
                record.level(),
                message
            ))
        })
        .level(level)
        // The filesystem watcher backend is chatty at debug level
        .level_for("notify", log::LevelFilter::Warn)
        .chain(std::io::stderr());

    let logger = if let Some(output_dir) = output_dir {
        let log_filename = output_dir.join(LOG_FILENAME);
        logger.chain(fern::log_file(log_filename)?)
    } else {
        logger
    };

    logger.apply()?;
    Ok(())
}

/// Create the work directory if needed, then setup logger to write there
///
/// Unlike a fresh output directory, an existing work directory is expected here, because the
/// monitor resumes from the state it finds in it.
///
/// #Arguments
/// * `debug` - If true use debug log level, and info level otherwise
///
pub fn setup_work_dir_and_logger(work_dir: Option<&Utf8Path>, debug: bool) {
    if let Some(work_dir) = work_dir {
        create_dir_all(work_dir, "work");
    }
    if let Err(err) = setup_logger(work_dir, debug) {
        eprintln!("Unable to initialize logger: {err}");
        std::process::exit(exitcode::CANTCREAT);
    }
}
