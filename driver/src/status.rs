//! NTSTATUS Codes
//!
//! Status values returned by the proxy's fallible operations. The raw value
//! is the NT `i32` status; [`NtStatus`] wraps it so that operations can
//! return `NtResult<T>` and propagate failures with `?`.
//!
//! # NT Semantics
//!
//! - Severity lives in the top two bits: `00` success, `01` informational,
//!   `10` warning, `11` error
//! - `NT_SUCCESS(status)` is `status >= 0`
//! - Warnings such as `STATUS_BUFFER_OVERFLOW` are not success

use core::fmt;

/// NTSTATUS value
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NtStatus(pub i32);

/// Result of a fallible NT operation
pub type NtResult<T> = Result<T, NtStatus>;

pub const STATUS_SUCCESS: NtStatus = NtStatus(0);
pub const STATUS_BUFFER_OVERFLOW: NtStatus = NtStatus(0x8000_0005u32 as i32);
pub const STATUS_INVALID_PARAMETER: NtStatus = NtStatus(-1073741811); // 0xC000000D
pub const STATUS_SHARING_VIOLATION: NtStatus = NtStatus(-1073741757); // 0xC0000043
pub const STATUS_DELETE_PENDING: NtStatus = NtStatus(-1073741738); // 0xC0000056
pub const STATUS_INSUFFICIENT_RESOURCES: NtStatus = NtStatus(-1073741670); // 0xC000009A
pub const STATUS_INVALID_DEVICE_STATE: NtStatus = NtStatus(-1073741436); // 0xC0000184

impl NtStatus {
    /// NT_SUCCESS
    #[inline]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// Raw NTSTATUS value
    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert a status into a result, mapping non-success to `Err`
    #[inline]
    pub fn into_result(self) -> NtResult<()> {
        if self.is_success() {
            Ok(())
        } else {
            Err(self)
        }
    }

    /// Symbolic name for the statuses this driver produces
    pub fn name(self) -> Option<&'static str> {
        match self.0 as u32 {
            0x0000_0000 => Some("STATUS_SUCCESS"),
            0x8000_0005 => Some("STATUS_BUFFER_OVERFLOW"),
            0xC000_000D => Some("STATUS_INVALID_PARAMETER"),
            0xC000_0043 => Some("STATUS_SHARING_VIOLATION"),
            0xC000_0056 => Some("STATUS_DELETE_PENDING"),
            0xC000_009A => Some("STATUS_INSUFFICIENT_RESOURCES"),
            0xC000_0184 => Some("STATUS_INVALID_DEVICE_STATE"),
            _ => None,
        }
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "NtStatus({:#010x})", self.0 as u32),
        }
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<NtStatus> for i32 {
    fn from(status: NtStatus) -> i32 {
        status.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::format;

    #[test]
    fn test_severity() {
        assert!(STATUS_SUCCESS.is_success());
        assert!(!STATUS_BUFFER_OVERFLOW.is_success());
        assert!(!STATUS_SHARING_VIOLATION.is_success());
        assert_eq!(STATUS_INSUFFICIENT_RESOURCES.raw() as u32, 0xC000_009A);
        assert_eq!(STATUS_INVALID_DEVICE_STATE.raw() as u32, 0xC000_0184);
    }

    #[test]
    fn test_into_result() {
        assert_eq!(STATUS_SUCCESS.into_result(), Ok(()));
        assert_eq!(STATUS_DELETE_PENDING.into_result(), Err(STATUS_DELETE_PENDING));
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", STATUS_DELETE_PENDING), "STATUS_DELETE_PENDING");
        assert_eq!(format!("{:?}", NtStatus(0x103)), "NtStatus(0x00000103)");
    }
}
