//! Path policy: turn hostile, user-controlled segments into deterministic,
//! safe paths under the storage root.
//!
//! Any output is either rejected with a permanent validation error or is a
//! canonical form that [`ensure_within_root`] accepts against the configured
//! root.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathPolicyError {
    #[error("empty path segment is not allowed")]
    EmptySegment,
    #[error("dot segments are not allowed")]
    DotSegment,
    #[error("null bytes are not allowed")]
    NulByte,
    #[error("path separators are not allowed in segments")]
    Separator,
    #[error("path segment too long (max_length={max_length})")]
    SegmentTooLong { max_length: usize },
    #[error("too many path segments (max_depth={max_depth})")]
    TooDeep { max_depth: usize },
    #[error("target path escapes root")]
    EscapesRoot,
    #[error("target path traverses a symlink under storage root")]
    SymlinkUnderRoot,
    #[error("target path validation failed (unreadable component)")]
    UnreadableComponent,
    #[error("archive_path is not allowed by allow_prefixes policy")]
    PrefixNotAllowed,
    #[error("allow_prefixes entries must be non-empty strings")]
    EmptyPrefix,
    #[error("filename_pattern produced an empty filename")]
    EmptyFilename,
    #[error("filename_pattern must not include path separators or null bytes")]
    FilenameSeparator,
    #[error("invalid filename_pattern format: unknown placeholder {0:?}")]
    UnknownPlaceholder(String),
}

pub const DEFAULT_MAX_DEPTH: usize = 10;
pub const DEFAULT_MAX_SEGMENT_LENGTH: usize = 64;

/// Fold a single non-ASCII character the way an NFKD pass followed by
/// combining-mark removal would: accented Latin letters lose their marks,
/// everything without an ASCII base letter maps to `None`.
fn fold_to_ascii(ch: char) -> Option<char> {
    let folded = match ch {
        'À'..='Å' | 'Ā' | 'Ă' | 'Ą' => 'A',
        'à'..='å' | 'ā' | 'ă' | 'ą' => 'a',
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => 'C',
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => 'c',
        'Ď' => 'D',
        'ď' => 'd',
        'È'..='Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => 'E',
        'è'..='ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => 'e',
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => 'G',
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => 'g',
        'Ĥ' => 'H',
        'ĥ' => 'h',
        'Ì'..='Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => 'I',
        'ì'..='ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' => 'i',
        'Ĵ' => 'J',
        'ĵ' => 'j',
        'Ķ' => 'K',
        'ķ' => 'k',
        'Ĺ' | 'Ļ' | 'Ľ' => 'L',
        'ĺ' | 'ļ' | 'ľ' => 'l',
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => 'N',
        'ñ' | 'ń' | 'ņ' | 'ň' => 'n',
        'Ò'..='Ö' | 'Ō' | 'Ŏ' | 'Ő' => 'O',
        'ò'..='ö' | 'ō' | 'ŏ' | 'ő' => 'o',
        'Ŕ' | 'Ŗ' | 'Ř' => 'R',
        'ŕ' | 'ŗ' | 'ř' => 'r',
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => 'S',
        'ś' | 'ŝ' | 'ş' | 'š' => 's',
        'Ţ' | 'Ť' => 'T',
        'ţ' | 'ť' => 't',
        'Ù'..='Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => 'U',
        'ù'..='ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => 'u',
        'Ŵ' => 'W',
        'ŵ' => 'w',
        'Ý' | 'Ŷ' | 'Ÿ' => 'Y',
        'ý' | 'ÿ' | 'ŷ' => 'y',
        'Ź' | 'Ż' | 'Ž' => 'Z',
        'ź' | 'ż' | 'ž' => 'z',
        _ => return None,
    };
    Some(folded)
}

/// Produce a filesystem-safe path segment.
///
/// Accented Latin characters are reduced to their ASCII base, other
/// non-ASCII characters become `_` (so CJK/emoji segments never collapse to
/// nothing), whitespace becomes `_`, only `[A-Za-z0-9._-]` survive, and
/// runs of `_` are collapsed. Length and reserved-segment rules are the job
/// of [`validate_segments`].
pub fn sanitize_segment(seg: &str) -> String {
    let mut out = String::with_capacity(seg.len());
    let mut last_underscore = false;

    for ch in seg.chars() {
        let mapped = if ch.is_ascii() {
            if ch.is_ascii_whitespace() {
                '_'
            } else if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        } else if ch.is_whitespace() {
            '_'
        } else {
            fold_to_ascii(ch).unwrap_or('_')
        };

        if mapped == '_' {
            if !last_underscore {
                out.push('_');
            }
            last_underscore = true;
        } else {
            out.push(mapped);
            last_underscore = false;
        }
    }

    if !seg.is_empty() && out.is_empty() {
        out.push('_');
    }
    out
}

fn validate_segment(seg: &str, max_length: usize) -> Result<(), PathPolicyError> {
    if seg.is_empty() {
        return Err(PathPolicyError::EmptySegment);
    }
    if seg == "." || seg == ".." {
        return Err(PathPolicyError::DotSegment);
    }
    if seg.contains('\0') {
        return Err(PathPolicyError::NulByte);
    }
    if seg.contains('/') || seg.contains('\\') {
        return Err(PathPolicyError::Separator);
    }
    if seg.chars().count() > max_length {
        return Err(PathPolicyError::SegmentTooLong { max_length });
    }
    Ok(())
}

pub fn validate_segments(
    segments: &[impl AsRef<str>],
    max_depth: usize,
    max_length: usize,
) -> Result<(), PathPolicyError> {
    debug_assert!(max_depth > 0 && max_length > 0);
    if segments.len() > max_depth {
        return Err(PathPolicyError::TooDeep { max_depth });
    }
    for seg in segments {
        validate_segment(seg.as_ref(), max_length)?;
    }
    Ok(())
}

/// Resolve a path without requiring it to exist: the longest existing
/// ancestor is canonicalized (following its symlinks), the remaining
/// components are appended with `.`/`..` handled lexically.
fn resolve_lenient(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut remainder: Vec<std::ffi::OsString> = Vec::new();
    let resolved_base = loop {
        match existing.canonicalize() {
            Ok(resolved) => break resolved,
            Err(_) => match existing.parent() {
                Some(parent) => {
                    if let Some(name) = existing.file_name() {
                        remainder.push(name.to_os_string());
                    }
                    existing = parent;
                }
                None => break PathBuf::from(existing),
            },
        }
    };

    let mut out = resolved_base;
    for component in remainder.into_iter().rev() {
        match Path::new(&component).components().next() {
            Some(Component::ParentDir) => {
                out.pop();
            }
            Some(Component::CurDir) | None => {}
            _ => out.push(component),
        }
    }
    Ok(out)
}

/// Both paths are resolved without following the trailing component; the
/// target must equal the root or live beneath it.
pub fn ensure_within_root(root: &Path, target: &Path) -> Result<(), PathPolicyError> {
    let root_resolved =
        resolve_lenient(root).map_err(|_| PathPolicyError::UnreadableComponent)?;
    let target_resolved =
        resolve_lenient(target).map_err(|_| PathPolicyError::UnreadableComponent)?;

    if target_resolved.starts_with(&root_resolved) {
        Ok(())
    } else {
        Err(PathPolicyError::EscapesRoot)
    }
}

fn parse_prefix_segments(prefix: &str) -> Result<Vec<String>, PathPolicyError> {
    if prefix.trim().is_empty() {
        return Err(PathPolicyError::EmptyPrefix);
    }
    let parts: Vec<String> = prefix
        .split(['>', '/'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    if parts.is_empty() {
        return Err(PathPolicyError::EmptyPrefix);
    }
    Ok(parts)
}

/// Build the deterministic directory `root / <sanitized user> /
/// <sanitized segments...>`, validating raw inputs first, sanitizing, then
/// validating the sanitized output and confining the result to the root.
pub fn build_target_dir(
    root: &Path,
    username: &str,
    segments: &[String],
    allow_prefixes: &[String],
    max_depth: usize,
    max_length: usize,
) -> Result<PathBuf, PathPolicyError> {
    validate_segments(std::slice::from_ref(&username), 1, max_length)?;
    validate_segments(segments, max_depth, max_length)?;

    let user_safe = sanitize_segment(username);
    let segs_safe: Vec<String> = segments.iter().map(|s| sanitize_segment(s)).collect();

    validate_segments(std::slice::from_ref(&user_safe.as_str()), 1, max_length)?;
    validate_segments(&segs_safe, max_depth, max_length)?;

    if !allow_prefixes.is_empty() {
        let mut allowed = false;
        for prefix in allow_prefixes {
            let parts = parse_prefix_segments(prefix)?;
            validate_segments(&parts, max_depth, max_length)?;
            let parts_safe: Vec<String> = parts.iter().map(|p| sanitize_segment(p)).collect();
            validate_segments(&parts_safe, max_depth, max_length)?;
            if segs_safe.len() >= parts_safe.len() && segs_safe[..parts_safe.len()] == parts_safe[..]
            {
                allowed = true;
                break;
            }
        }
        if !allowed {
            return Err(PathPolicyError::PrefixNotAllowed);
        }
    }

    let mut target = root.join(&user_safe);
    for seg in &segs_safe {
        target.push(seg);
    }

    ensure_within_root(root, &target)?;
    Ok(target)
}

/// Render a deterministic, filesystem-safe filename from a pattern.
///
/// Supported placeholders: `{ticket_number}`, `{timestamp_utc}` (date-only
/// for stability), and `{date_utc}` as an alias. The result must be a
/// single safe path segment.
pub fn build_filename_from_pattern(
    pattern: &str,
    ticket_number: &str,
    timestamp_utc: &str,
) -> Result<String, PathPolicyError> {
    if pattern.trim().is_empty() {
        return Err(PathPolicyError::EmptyFilename);
    }

    let ticket_safe = sanitize_segment(ticket_number);
    let ts_safe = sanitize_segment(timestamp_utc);

    let mut rendered = String::with_capacity(pattern.len() + 16);
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '{' {
            rendered.push(ch);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for inner in chars.by_ref() {
            if inner == '}' {
                closed = true;
                break;
            }
            name.push(inner);
        }
        if !closed {
            return Err(PathPolicyError::UnknownPlaceholder(format!("{{{name}")));
        }
        match name.as_str() {
            "ticket_number" => rendered.push_str(&ticket_safe),
            "timestamp_utc" | "date_utc" => rendered.push_str(&ts_safe),
            other => return Err(PathPolicyError::UnknownPlaceholder(other.to_string())),
        }
    }

    let rendered = rendered.trim().to_string();
    if rendered.is_empty() {
        return Err(PathPolicyError::EmptyFilename);
    }
    if rendered.contains('/') || rendered.contains('\\') || rendered.contains('\0') {
        return Err(PathPolicyError::FilenameSeparator);
    }

    validate_segments(std::slice::from_ref(&rendered.as_str()), 1, 255)?;
    Ok(rendered)
}
