use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode, WriteLogger};
use std::cmp;
use std::os::raw::c_char;
use std::sync::Once;

static LOGGER_SETUP: Once = Once::new();

/// Set up the process-wide logger, if one hasn't been set up yet. Logs to STDERR unless the
/// `CLAP_REMOTE_LOG` environment variable is set to a file path, in which case output is appended
/// to that file. Called from the entry's `init`, and harmless to call more than once.
pub fn setup_logger() {
    LOGGER_SETUP.call_once(|| {
        let config = ConfigBuilder::new()
            .set_thread_level(LevelFilter::Debug)
            .build();
        let level = if cfg!(debug_assertions) {
            LevelFilter::Trace
        } else {
            LevelFilter::Info
        };

        let result = match std::env::var("CLAP_REMOTE_LOG") {
            Ok(path) => match std::fs::OpenOptions::new().append(true).create(true).open(&path) {
                Ok(file) => WriteLogger::init(level, config, file),
                Err(err) => {
                    eprintln!("Could not open '{path}' for logging ({err}), using STDERR instead");
                    TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto)
                }
            },
            Err(_) => TermLogger::init(level, config, TerminalMode::Stderr, ColorChoice::Auto),
        };

        if let Err(err) = result {
            eprintln!("Could not set up the logger: {err}");
        }
    });
}

/// The equivalent of the `strlcpy()` C function. Copy `src` to `dest` as a null-terminated
/// C-string. If `dest` does not have enough capacity, add a null terminator at the end to prevent
/// buffer overflows.
pub fn strlcpy(dest: &mut [c_char], src: &str) {
    if dest.is_empty() {
        return;
    }

    let src_bytes: &[u8] = src.as_bytes();
    let src_bytes_signed: &[c_char] = unsafe { &*(src_bytes as *const [u8] as *const [c_char]) };

    // Make sure there's always room for a null terminator
    let copy_len = cmp::min(dest.len() - 1, src.len());
    dest[..copy_len].copy_from_slice(&src_bytes_signed[..copy_len]);
    dest[copy_len] = 0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strlcpy_truncates_and_terminates() {
        let mut buffer = [0x7f as c_char; 4];
        strlcpy(&mut buffer, "abcdef");
        assert_eq!(&buffer, &[b'a' as c_char, b'b' as c_char, b'c' as c_char, 0]);

        let mut buffer = [0x7f as c_char; 8];
        strlcpy(&mut buffer, "ab");
        assert_eq!(buffer[0], b'a' as c_char);
        assert_eq!(buffer[1], b'b' as c_char);
        assert_eq!(buffer[2], 0);
    }
}
