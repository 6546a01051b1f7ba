use std::ffi::CString;

use super::{journal_lines, Journal, Level};

/// Writes to the local syslog daemon (and through it the systemd journal)
/// under the `user` facility.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyslogJournal;

impl Journal for SyslogJournal {
    fn write(&self, message: &str, level: Level, identity: &str) {
        if message.trim().is_empty() && identity.trim().is_empty() {
            return;
        }
        let ident = match CString::new(identity) {
            Ok(ident) => ident,
            Err(_) => return,
        };

        // openlog keeps the ident pointer, so `ident` must outlive closelog.
        unsafe {
            libc::openlog(ident.as_ptr(), libc::LOG_CONS | libc::LOG_PID, libc::LOG_USER);
        }
        for line in journal_lines(message) {
            let Ok(line) = CString::new(line) else {
                continue;
            };
            unsafe {
                libc::syslog(
                    libc::LOG_USER | level as libc::c_int,
                    c"%s".as_ptr(),
                    line.as_ptr(),
                );
            }
        }
        unsafe {
            libc::closelog();
        }
    }
}
