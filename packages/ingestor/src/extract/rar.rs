use std::fs;
use std::path::Path;

use unrar::Archive;
use unrar::error::{Code, UnrarError};

use super::{ExtractError, ExtractLimits, ExtractedMember, relative_path_string,
            sanitize_member_path};

pub(super) fn extract(
    archive_path: &Path,
    dest: &Path,
    limits: &ExtractLimits,
) -> Result<Vec<ExtractedMember>, ExtractError> {
    let mut archive = Archive::new(archive_path)
        .open_for_processing()
        .map_err(map_rar_err)?;

    let mut members = Vec::new();
    let mut total_unpacked: u64 = 0;
    let mut member_count: usize = 0;

    while let Some(header) = archive.read_header().map_err(map_rar_err)? {
        member_count += 1;
        if member_count > limits.max_members {
            return Err(ExtractError::TooManyMembers {
                limit: limits.max_members,
            });
        }

        let entry = header.entry();
        let raw_name = entry.filename.to_string_lossy().into_owned();

        archive = if entry.is_file() {
            // The sanitized path is the literal write target; the decoder is
            // never allowed to derive a destination from the raw entry name.
            let clean = sanitize_member_path(&raw_name)?;
            let out_path = dest.join(&clean);

            // RAR headers carry the unpacked size; charge the budget before
            // decompressing anything.
            total_unpacked = total_unpacked.saturating_add(entry.unpacked_size as u64);
            if total_unpacked > limits.max_total_bytes {
                return Err(ExtractError::TotalSizeExceeded {
                    limit: limits.max_total_bytes,
                });
            }

            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let next = header.extract_to(&out_path).map_err(map_rar_err)?;
            members.push(ExtractedMember {
                relative_path: relative_path_string(&clean),
                disk_path: out_path,
            });
            next
        } else {
            // Directories and special entries are skipped, not materialized.
            header.skip().map_err(map_rar_err)?
        };
    }

    Ok(members)
}

fn map_rar_err(err: UnrarError) -> ExtractError {
    match err.code {
        Code::MissingPassword | Code::BadPassword => ExtractError::PasswordRequired,
        _ => ExtractError::Malformed(format!("{err:?}")),
    }
}
