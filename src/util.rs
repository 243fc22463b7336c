use std::{
    any::type_name,
    fs::{self, Permissions},
    io::Write,
    ops::{Add, Rem, Sub},
    path::Path,
};

use zerocopy::FromBytes;

use crate::ReadError;

pub fn read<T: FromBytes + Copy>(resource: &[u8]) -> Result<T, ReadError> {
    T::read_from_prefix(resource)
        .map_err(|_| ReadError(type_name::<T>().to_string()))
        .map(|(value, _)| value)
}

/// Read a value at the given offset, failing instead of panicking if the offset is out of bounds.
pub fn read_at<T: FromBytes + Copy>(data: &[u8], offset: usize) -> Result<T, ReadError> {
    let slice = data.get(offset..).ok_or_else(|| {
        ReadError(format!("{} at {:#x} outside of {:#x} bytes", type_name::<T>(), offset, data.len()))
    })?;
    read::<T>(slice).map_err(|e| ReadError(format!("{} at {:#x}", e.0, offset)))
}

/// Returns the subslice at the given range, failing instead of panicking if it is out of bounds.
pub fn slice_at(data: &[u8], offset: usize, size: usize) -> Result<&[u8], ReadError> {
    offset
        .checked_add(size)
        .and_then(|end| data.get(offset..end))
        .ok_or_else(|| {
            ReadError(format!("{:#x} bytes at {:#x} outside of {:#x} bytes", size, offset, data.len()))
        })
}

pub fn aligned_to<T: Add<Output = T> + Sub<Output = T> + Rem<Output = T> + Eq + Copy + Default>(
    value: T, alignment: T,
) -> T {
    if alignment == T::default() || value % alignment == T::default() {
        return value;
    }
    value + alignment - (value % alignment)
}

/// Pad the buffer with zeros until its length is a multiple of the alignment.
pub fn pad_to(data: &mut Vec<u8>, alignment: usize) { data.resize(aligned_to(data.len(), alignment), 0); }

/// Read a null-terminated UTF-16LE string.
/// # Returns
/// The string and the number of bytes consumed including the terminator.
pub fn read_u16_string(data: &[u8]) -> Result<(String, usize), ReadError> {
    let mut units = Vec::new();
    let mut offset = 0;
    loop {
        let c = read_at::<u16>(data, offset)
            .map_err(|_| ReadError("unterminated utf16 string".to_string()))?;
        offset += 2;
        if c == 0 {
            break;
        }
        units.push(c);
    }
    Ok((String::from_utf16_lossy(&units), offset))
}

/// Encode a string as null-terminated UTF-16LE.
pub fn string_to_u16<S: AsRef<str>>(string: S) -> Vec<u8> {
    let string = string.as_ref();
    let mut data = Vec::with_capacity(string.len() * 2 + 2);
    data.extend(string.encode_utf16().flat_map(|c| c.to_le_bytes()));
    data.extend([0, 0]);
    data
}

/// Write the data to a temporary file in the destination directory and move it into place.
/// The destination is either fully replaced or left untouched.
///
/// Without explicit permissions the file keeps the permissions of an existing destination,
/// a new file is created with [`default_permissions`].
pub fn write_atomically(path: &Path, data: &[u8], permissions: Option<Permissions>) -> std::io::Result<()> {
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let permissions = permissions
        .or_else(|| fs::metadata(path).ok().map(|metadata| metadata.permissions()))
        .or_else(default_permissions);
    let mut file = tempfile::NamedTempFile::new_in(directory)?;
    file.write_all(data)?;
    if let Some(permissions) = permissions {
        file.as_file().set_permissions(permissions)?;
    }
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Permissions of newly written executables: `rwxr-xr-x` on unix, the platform default elsewhere.
#[cfg(unix)]
pub fn default_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o755))
}

/// Permissions of newly written executables: `rwxr-xr-x` on unix, the platform default elsewhere.
#[cfg(not(unix))]
pub fn default_permissions() -> Option<Permissions> { None }
