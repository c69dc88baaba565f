// Standard input handling for the PAM flow.
//
// pam_exec pipes the password (or token) to us; sshd hands the key lookup
// /dev/null or a terminal. Only a pipe or a regular file is read, and it is
// read once, to the end, before any decision is made.

use std::fs::File;
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::os::unix::fs::FileTypeExt;

/// Read all of standard input if it is a pipe or a regular file.
/// Returns `None` for terminals, character devices and the like.
pub fn read_piped_stdin() -> io::Result<Option<Vec<u8>>> {
    let stdin = io::stdin();
    let file_type = File::from(stdin.as_fd().try_clone_to_owned()?)
        .metadata()?
        .file_type();
    if !(file_type.is_fifo() || file_type.is_file()) {
        return Ok(None);
    }

    let mut buf = Vec::new();
    stdin.lock().read_to_end(&mut buf)?;
    Ok(Some(buf))
}

/// Drop one trailing NUL byte. Some PAM implementations pad the
/// authentication token with it.
pub fn strip_trailing_nul(raw: &str) -> &str {
    raw.strip_suffix('\0').unwrap_or(raw)
}
