//! Generic FMAP search over any readable target
//!
//! [`read_fmap_from_flash`](super::read_fmap_from_flash) runs the same
//! bsearch/lsearch strategy directly against a `SpiMaster` + `FlashContext`
//! pair. Callers that only have a higher-level handle (a boxed
//! `dyn FlashDevice`, a flash image already read into memory) can't supply
//! those two types, so this module re-expresses the search over the minimal
//! [`FmapSearchable`] trait instead.

use std::vec;

use super::fmap::{self, is_valid_fmap_header};
use super::{has_fmap, Layout, LayoutError};

/// Minimal capability a FMAP search target needs: its size, and random-access
/// reads into a caller-supplied buffer.
pub trait FmapSearchable {
    /// Total size of the searchable data, in bytes
    fn size(&self) -> u32;

    /// Read `buf.len()` bytes starting at `offset`
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), LayoutError>;
}

impl FmapSearchable for &[u8] {
    fn size(&self) -> u32 {
        self.len() as u32
    }

    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), LayoutError> {
        let offset = offset as usize;
        let end = offset.checked_add(buf.len()).ok_or(LayoutError::IoError)?;
        let slice = self.get(offset..end).ok_or(LayoutError::IoError)?;
        buf.copy_from_slice(slice);
        Ok(())
    }
}

const FMAP_HEADER_SIZE: usize = 56;
const FMAP_AREA_SIZE: usize = 42;
const FMAP_SIGNATURE: &[u8; 8] = b"__FMAP__";

/// Search `target` for a FMAP structure and parse it into a [`Layout`]
///
/// Follows the same binary-search-then-linear-search strategy as
/// [`read_fmap_from_flash`](super::read_fmap_from_flash): check common
/// power-of-2-aligned offsets first, then fall back to reading the whole
/// target and scanning linearly.
pub fn search_fmap<T: FmapSearchable + ?Sized>(target: &mut T) -> Result<Layout, LayoutError> {
    let size = target.size();

    if let Some(layout) = bsearch_fmap(target, size, 256)? {
        return Ok(layout);
    }

    lsearch_fmap(target, size)
}

fn bsearch_fmap<T: FmapSearchable + ?Sized>(
    target: &mut T,
    size: u32,
    min_stride: u32,
) -> Result<Option<Layout>, LayoutError> {
    if (size as usize) < FMAP_HEADER_SIZE {
        return Ok(None);
    }

    let mut sig_buf = [0u8; 8];
    let mut stride = size / 2;
    let mut check_offset_0 = true;

    while stride >= min_stride {
        let mut offset = 0u32;
        while offset <= size - FMAP_HEADER_SIZE as u32 {
            if offset != 0 && offset.is_multiple_of(stride * 2) {
                offset += stride;
                continue;
            }
            if offset == 0 {
                if !check_offset_0 {
                    offset += stride;
                    continue;
                }
                check_offset_0 = false;
            }

            if target.read_at(offset, &mut sig_buf).is_err() || &sig_buf != FMAP_SIGNATURE {
                offset += stride;
                continue;
            }

            let mut header_buf = vec![0u8; FMAP_HEADER_SIZE];
            if target.read_at(offset, &mut header_buf).is_ok()
                && is_valid_fmap_header(&header_buf)
            {
                if let Ok(layout) = read_fmap_at(target, offset) {
                    return Ok(Some(layout));
                }
            }

            offset += stride;
        }

        stride /= 2;
    }

    Ok(None)
}

fn lsearch_fmap<T: FmapSearchable + ?Sized>(
    target: &mut T,
    size: u32,
) -> Result<Layout, LayoutError> {
    let mut buf = vec![0u8; size as usize];
    target
        .read_at(0, &mut buf)
        .map_err(|_| LayoutError::IoError)?;

    if !has_fmap(&buf) {
        return Err(LayoutError::InvalidFmapSignature);
    }

    fmap::parse_fmap(&buf)
}

fn read_fmap_at<T: FmapSearchable + ?Sized>(
    target: &mut T,
    offset: u32,
) -> Result<Layout, LayoutError> {
    let mut header = vec![0u8; FMAP_HEADER_SIZE];
    target
        .read_at(offset, &mut header)
        .map_err(|_| LayoutError::IoError)?;

    if !is_valid_fmap_header(&header) {
        return Err(LayoutError::InvalidFmapSignature);
    }

    let nareas = u16::from_le_bytes([header[54], header[55]]) as usize;
    let total_size = FMAP_HEADER_SIZE + nareas * FMAP_AREA_SIZE;

    let mut fmap_data = vec![0u8; total_size];
    target
        .read_at(offset, &mut fmap_data)
        .map_err(|_| LayoutError::IoError)?;

    fmap::parse_fmap_at(&fmap_data, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_fmap(total: usize, fmap_offset: usize) -> vec::Vec<u8> {
        let mut data = vec![0xFFu8; total];

        data[fmap_offset..fmap_offset + 8].copy_from_slice(FMAP_SIGNATURE);
        data[fmap_offset + 8] = 1;
        data[fmap_offset + 9] = 0;
        data[fmap_offset + 10..fmap_offset + 18].copy_from_slice(&0u64.to_le_bytes());
        data[fmap_offset + 18..fmap_offset + 22].copy_from_slice(&(total as u32).to_le_bytes());
        let name = b"TEST\0";
        data[fmap_offset + 22..fmap_offset + 22 + name.len()].copy_from_slice(name);
        data[fmap_offset + 54..fmap_offset + 56].copy_from_slice(&1u16.to_le_bytes());

        let area_offset = fmap_offset + FMAP_HEADER_SIZE;
        data[area_offset..area_offset + 4].copy_from_slice(&0u32.to_le_bytes());
        data[area_offset + 4..area_offset + 8].copy_from_slice(&(total as u32).to_le_bytes());
        let area_name = b"WHOLE\0";
        data[area_offset + 8..area_offset + 8 + area_name.len()].copy_from_slice(area_name);
        data[area_offset + 40..area_offset + 42].copy_from_slice(&0u16.to_le_bytes());

        data
    }

    #[test]
    fn search_fmap_finds_bsearch_aligned_offset() {
        let data = make_test_fmap(0x10000, 0x8000);
        let layout = search_fmap(&mut data.as_slice()).unwrap();
        assert_eq!(layout.regions.len(), 1);
        assert_eq!(layout.regions[0].name, "WHOLE");
    }

    #[test]
    fn search_fmap_falls_back_to_linear_search() {
        let data = make_test_fmap(0x4000, 0x321);
        let layout = search_fmap(&mut data.as_slice()).unwrap();
        assert_eq!(layout.regions.len(), 1);
    }

    #[test]
    fn search_fmap_errors_when_absent() {
        let data = vec![0xFFu8; 0x1000];
        assert!(search_fmap(&mut data.as_slice()).is_err());
    }
}
