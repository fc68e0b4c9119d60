#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::FontError;

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

/// Well-known files tried, in order, for generic family names.
fn generic_candidates(family: &str) -> &'static [&'static str] {
    match family {
        "monospace" | "mono" => &[
            "DejaVuSansMono",
            "LiberationMono-Regular",
            "NotoSansMono-Regular",
            "JetBrainsMono-Regular",
            "UbuntuMono-R",
            "FreeMono",
        ],
        "sans" | "sans-serif" => &[
            "DejaVuSans",
            "LiberationSans-Regular",
            "NotoSans-Regular",
            "FreeSans",
        ],
        "serif" => &[
            "DejaVuSerif",
            "LiberationSerif-Regular",
            "NotoSerif-Regular",
            "FreeSerif",
        ],
        _ => &[],
    }
}

/// Directories searched for installed fonts, system first.
pub fn font_dirs() -> Vec<PathBuf> {
    let mut search = vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
    ];
    if let Some(user) = dirs::font_dir() {
        search.push(user);
    }
    if let Some(home) = dirs::home_dir() {
        search.push(home.join(".fonts"));
    }
    search
}

/// Map a font name to a file.
///
/// A name containing `/` is taken as a path. Otherwise it is matched
/// against file stems under `search`: generic families (`monospace`,
/// `sans`, `serif`) try a list of common files, any other name matches
/// stems equal to it with spaces removed, preferring `-Regular` variants.
pub fn resolve_font(name: &str, search: &[PathBuf]) -> Result<PathBuf, FontError> {
    if name.contains('/') {
        return Ok(PathBuf::from(name));
    }

    let files = collect_font_files(search);
    let family = name.to_ascii_lowercase();

    for candidate in generic_candidates(&family) {
        if let Some(path) = files.iter().find(|p| stem_eq(p, candidate)) {
            tracing::debug!(family = name, path = %path.display(), "resolved generic font family");
            return Ok(path.clone());
        }
    }

    let wanted: String = family.chars().filter(|c| !c.is_whitespace()).collect();
    let regular = format!("{wanted}-regular");
    let found = files
        .iter()
        .find(|p| stem_eq(p, &regular))
        .or_else(|| files.iter().find(|p| stem_eq(p, &wanted)))
        .or_else(|| {
            files.iter().find(|p| {
                stem(p).is_some_and(|s| s.to_ascii_lowercase().starts_with(&wanted))
            })
        });

    match found {
        Some(path) => {
            tracing::debug!(family = name, path = %path.display(), "resolved font family");
            Ok(path.clone())
        }
        None => Err(FontError::NotFound {
            family: name.to_string(),
        }),
    }
}

fn collect_font_files(search: &[PathBuf]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = search
        .iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| WalkDir::new(dir).follow_links(true).into_iter())
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| has_font_extension(path))
        .collect();
    // Shorter paths first: top-level installs beat nested variant folders.
    files.sort_by_key(|p| (p.components().count(), p.clone()));
    files
}

fn has_font_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| FONT_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)))
}

fn stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

fn stem_eq(path: &Path, wanted: &str) -> bool {
    stem(path).is_some_and(|s| s.eq_ignore_ascii_case(wanted))
}
