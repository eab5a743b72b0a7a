/// Entity families identified by a unique normalized name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKind {
    Label,
    Artist,
}

impl NamedKind {
    pub fn table(self) -> &'static str {
        match self {
            NamedKind::Label => "label",
            NamedKind::Artist => "artist",
        }
    }
}

/// A name split into its lookup key and its display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name {
    pub key: String,
    pub display: String,
}

/// Trims and case-folds a raw name. The key is the uniqueness and lookup
/// form; the display keeps the trimmed original casing.
pub fn normalize(raw: &str) -> Name {
    let display = raw.trim();
    Name {
        key: display.to_lowercase(),
        display: display.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedEntity {
    pub id: i64,
    pub kind: NamedKind,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRelease {
    pub title: String,
    pub release_id: i64,
    pub master_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub id: i64,
    pub title: String,
    pub release_id: i64,
    pub master_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_folds_case() {
        let name = normalize("  Warp Records \n");
        assert_eq!(name.key, "warp records");
        assert_eq!(name.display, "Warp Records");
    }

    #[test]
    fn normalize_is_case_insensitive() {
        assert_eq!(normalize("WARP RECORDS").key, normalize("warp records").key);
    }

    #[test]
    fn normalize_folds_non_ascii() {
        assert_eq!(normalize("Ásgeir").key, "ásgeir");
    }
}
