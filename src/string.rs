use std::io::SeekFrom;

use crate::consts;
use crate::error::Result;
use crate::system::SysFile;

/// Read a NUL-terminated string of at most 255 bytes from the current
/// position of `fh`, leaving the handle positioned just past the NUL.
///
/// Strings flagged as UTF-8 decode as such; everything else is decoded
/// leniently (charset conversion of MS-DOS OEM names is the front-end's
/// concern, not ours).
pub(crate) fn read_string(
    fh: &mut dyn SysFile,
    _is_utf8: bool,
) -> Result<String> {
    let base = fh.tell()?;
    let mut buf = [0u8; consts::MAX_STRING_SIZE + 1];
    let mut len = 0;
    while len < buf.len() {
        let n = fh.read(&mut buf[len..])?;
        if n == 0 {
            break;
        }
        len += n;
    }
    let end = match buf[..len].iter().position(|&byte| byte == 0) {
        Some(end) => end,
        None => data_format!(
            "string not NUL-terminated within {} bytes",
            consts::MAX_STRING_SIZE + 1
        ),
    };
    fh.seek(SeekFrom::Start(base + end as u64 + 1))?;
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::read_string;
    use crate::system::{MemSystem, OpenMode, System};

    #[test]
    fn reads_consecutive_strings() {
        let sys = MemSystem::new();
        sys.insert("s", b"disk1.cab\0DISK ONE\0rest".to_vec());
        let mut fh = sys.open("s", OpenMode::Read).unwrap();
        assert_eq!(read_string(&mut *fh, false).unwrap(), "disk1.cab");
        assert_eq!(read_string(&mut *fh, false).unwrap(), "DISK ONE");
        assert_eq!(fh.tell().unwrap(), 20);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let sys = MemSystem::new();
        sys.insert("s", vec![b'x'; 300]);
        let mut fh = sys.open("s", OpenMode::Read).unwrap();
        assert!(read_string(&mut *fh, false).is_err());
    }
}
