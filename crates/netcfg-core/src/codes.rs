//! HRESULT-style platform codes reported by configuration subsystems.

pub const FAIL: u32 = 0x8000_4005;
pub const INVALID_ARG: u32 = 0x8007_0057;
pub const FILE_NOT_FOUND: u32 = 0x8007_0002;
pub const ALREADY_EXISTS: u32 = 0x8007_00B7;

pub const ALREADY_INITIALIZED: u32 = 0x8004_A020;
pub const NOT_INITIALIZED: u32 = 0x8004_A021;
pub const IN_USE: u32 = 0x8004_A022;
pub const NO_WRITE_LOCK: u32 = 0x8004_A024;

const FACILITY_WIN32: u32 = 7;

/// Map an OS error number to its HRESULT form. Zero and values that already
/// look like HRESULTs pass through unchanged.
pub fn from_os_error(code: u32) -> u32 {
    if code == 0 || code & 0x8000_0000 != 0 {
        code
    } else {
        (code & 0x0000_FFFF) | (FACILITY_WIN32 << 16) | 0x8000_0000
    }
}
