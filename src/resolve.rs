use crate::models::{normalize, NamedEntity, NamedKind};
use crate::store::Store;
use anyhow::Result;
use rustc_hash::FxHashSet;

/// Normalized keys of `names`, first occurrence kept.
pub fn dedup_keys<'a, I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = FxHashSet::default();
    names
        .into_iter()
        .map(|name| normalize(name).key)
        .filter(|key| !key.is_empty() && seen.insert(key.clone()))
        .collect()
}

pub fn resolve_one(store: &mut dyn Store, kind: NamedKind, name: &str) -> Result<Option<NamedEntity>> {
    let key = normalize(name).key;
    if key.is_empty() {
        return Ok(None);
    }
    store.find_by_name(kind, &key)
}

/// Existing entities named anywhere in `names`. Unknown names are dropped.
pub fn resolve_many<'a, I>(store: &mut dyn Store, kind: NamedKind, names: I) -> Result<Vec<NamedEntity>>
where
    I: IntoIterator<Item = &'a str>,
{
    let keys = dedup_keys(names);
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    store.find_all_by_names(kind, &keys)
}

/// Removes `id` itself from `entities`; the flag reports whether it was there.
pub fn exclude_self(id: i64, entities: Vec<NamedEntity>) -> (Vec<NamedEntity>, bool) {
    let before = entities.len();
    let kept: Vec<_> = entities.into_iter().filter(|e| e.id != id).collect();
    let had_self = kept.len() != before;
    (kept, had_self)
}
