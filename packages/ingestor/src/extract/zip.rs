use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use zip::ZipArchive;
use zip::result::ZipError;

use super::{ExtractError, ExtractLimits, ExtractedMember, relative_path_string,
            sanitize_member_path};

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

pub(super) fn extract(
    archive_path: &Path,
    dest: &Path,
    limits: &ExtractLimits,
) -> Result<Vec<ExtractedMember>, ExtractError> {
    let file = fs::File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(map_zip_err)?;

    if archive.len() > limits.max_members {
        return Err(ExtractError::TooManyMembers {
            limit: limits.max_members,
        });
    }

    let mut members = Vec::new();
    let mut total_written: u64 = 0;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(map_zip_err)?;

        if entry.is_dir() {
            continue;
        }
        // Symlinks are skipped, never materialized.
        if let Some(mode) = entry.unix_mode() {
            if mode & S_IFMT == S_IFLNK {
                continue;
            }
        }

        let raw_name = entry.name().to_string();
        let clean = sanitize_member_path(&raw_name)?;
        let out_path = dest.join(&clean);

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Copy in bounded chunks, accounting actual decompressed bytes
        // rather than trusting the central directory.
        let compressed_size = entry.compressed_size();
        let mut out = fs::File::create(&out_path)?;
        let mut written: u64 = 0;
        let mut buf = [0u8; 64 * 1024];

        loop {
            let n = entry.read(&mut buf)?;
            if n == 0 {
                break;
            }
            written += n as u64;
            total_written += n as u64;

            if total_written > limits.max_total_bytes {
                return Err(ExtractError::TotalSizeExceeded {
                    limit: limits.max_total_bytes,
                });
            }
            if compressed_size > 0
                && written > compressed_size.saturating_mul(limits.max_member_ratio)
            {
                return Err(ExtractError::RatioExceeded {
                    path: relative_path_string(&clean),
                    limit: limits.max_member_ratio,
                });
            }

            out.write_all(&buf[..n])?;
        }
        out.flush()?;

        members.push(ExtractedMember {
            relative_path: relative_path_string(&clean),
            disk_path: out_path,
        });
    }

    Ok(members)
}

fn map_zip_err(err: ZipError) -> ExtractError {
    match err {
        ZipError::Io(io) => ExtractError::Io(io),
        ZipError::UnsupportedArchive(msg) if msg.contains("Password") => {
            ExtractError::PasswordRequired
        }
        other => ExtractError::Malformed(other.to_string()),
    }
}
