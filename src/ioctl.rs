//! The fixed 64-byte binary request struct for the external IOCTL-style
//! interface (spec.md §6's wire format), plus the validation and
//! facade-dispatch glue around it.
//!
//! The struct's field order and sizes reproduce spec.md §6's byte
//! layout exactly: `repr(C)` alone is enough here because every
//! multi-byte field already lands on a naturally aligned offset (the
//! two 17-byte name/kind arrays plus a 2-byte pad bring the three
//! trailing `u64`s to offset 40, 48, 56 — all multiples of 8), so no
//! `packed` representation or manual padding is needed.
use crate::error::{CmaError, Result};
use crate::Cma;

/// `"cMa" + 0x42`, big-endian, identifying a request as belonging to
/// this wire format.
pub const CMA_IOCTL_MAGIC: u32 = u32::from_be_bytes([b'c', b'M', b'a', 0x42]);

/// One fixed-size, C-ABI-compatible allocation request/response.
///
/// `name`/`kind` are fixed-width byte buffers holding a NUL-terminated
/// (or exactly-16-byte, unterminated) ASCII string, matching how the
/// original kernel ioctl struct embeds device/kind identifiers inline
/// rather than by pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct CmaIoctlRequest {
    pub magic: u32,
    pub name: [u8; 17],
    pub kind: [u8; 17],
    pub pad: [u8; 2],
    pub size: u64,
    pub alignment: u64,
    pub start: u64,
}

static_assertions::const_assert_eq!(std::mem::size_of::<CmaIoctlRequest>(), 64);

fn str_from_fixed(buf: &[u8]) -> Result<&str> {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    std::str::from_utf8(&buf[..end]).map_err(|_| CmaError::InvalidArgument("field is not valid UTF-8"))
}

impl CmaIoctlRequest {
    /// Builds a request to hand to [`handle_alloc`], zeroing `start`.
    pub fn new(device: &str, kind: &str, size: u64, alignment: u64) -> Result<CmaIoctlRequest> {
        let mut req = CmaIoctlRequest {
            magic: CMA_IOCTL_MAGIC,
            name: [0; 17],
            kind: [0; 17],
            pad: [0; 2],
            size,
            alignment,
            start: 0,
        };

        let device_bytes = device.as_bytes();
        let kind_bytes = kind.as_bytes();
        if device_bytes.len() >= req.name.len() || kind_bytes.len() >= req.kind.len() {
            return Err(CmaError::InvalidArgument(
                "device or kind name too long for the wire format",
            ));
        }

        req.name[..device_bytes.len()].copy_from_slice(device_bytes);
        req.kind[..kind_bytes.len()].copy_from_slice(kind_bytes);
        Ok(req)
    }

    pub fn device(&self) -> Result<&str> {
        str_from_fixed(&self.name)
    }

    pub fn kind(&self) -> Result<&str> {
        str_from_fixed(&self.kind)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != CMA_IOCTL_MAGIC {
            return Err(CmaError::InvalidArgument("bad magic"));
        }
        Ok(())
    }
}

/// Services one allocation request in place: on success, `req.start` is
/// filled in with the carved chunk's base address.
pub fn handle_alloc(cma: &Cma, req: &mut CmaIoctlRequest) -> Result<()> {
    req.validate()?;
    let device = req.device()?;
    let kind = req.kind()?;
    let start = cma.alloc(device, kind, req.size, req.alignment)?;
    req.start = start;
    Ok(())
}

/// Services one release request: looks the chunk up by the `start`
/// field already filled in by the caller.
pub fn handle_release(cma: &Cma, req: &CmaIoctlRequest) -> Result<()> {
    req.validate()?;
    cma.release(req.start)
}

/// # Safety
///
/// `cma` must point to a live `Cma` and `req` to a single, live,
/// properly aligned `CmaIoctlRequest`, both valid for the duration of
/// the call — same contract as the teacher's own `#[no_mangle]` entry
/// points (`slitter_class_register` in `lib.rs`), which likewise take
/// raw pointers rather than references across the C ABI.
#[no_mangle]
pub unsafe extern "C" fn cma_ioctl_alloc(cma: *const Cma, req: *mut CmaIoctlRequest) -> i32 {
    let (cma, req) = match (cma.as_ref(), req.as_mut()) {
        (Some(cma), Some(req)) => (cma, req),
        _ => return -1,
    };

    match handle_alloc(cma, req) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn magic_is_the_expected_constant() {
        assert_eq!(CMA_IOCTL_MAGIC, 0x634D6142);
    }

    #[test]
    fn struct_is_exactly_64_bytes() {
        assert_eq!(std::mem::size_of::<CmaIoctlRequest>(), 64);
    }

    #[test]
    fn new_round_trips_device_and_kind() {
        let req = CmaIoctlRequest::new("display", "framebuffer", 4096, 4096).unwrap();
        assert_eq!(req.device().unwrap(), "display");
        assert_eq!(req.kind().unwrap(), "framebuffer");
        assert_eq!(req.magic, CMA_IOCTL_MAGIC);
    }

    #[test]
    fn rejects_names_too_long_for_the_wire_format() {
        let too_long = "a".repeat(17);
        assert!(CmaIoctlRequest::new(&too_long, "k", 4096, 4096).is_err());
    }

    #[test]
    fn rejects_bad_magic_on_validate() {
        let mut req = CmaIoctlRequest::new("d", "k", 4096, 4096).unwrap();
        req.magic = 0;
        assert!(matches!(req.validate(), Err(CmaError::InvalidArgument(_))));
    }
}
