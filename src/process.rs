//! Per-fact extraction rules. Each processor reads one dump element, decides
//! whether it is eligible, and applies its mutation through the [`Store`].
//!
//! Processors return `Ok(true)` when they created or mutated an entity and
//! `Ok(false)` when the element was skipped. Skips are never errors.

use crate::models::{normalize, NamedKind, NewRelease, Release};
use crate::parser::Element;
use crate::resolve::{exclude_self, resolve_many, resolve_one};
use crate::store::Store;
use anyhow::Result;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

pub type Processor = fn(&mut dyn Store, &Element) -> Result<bool>;

fn parse_id(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

fn create_named(store: &mut dyn Store, kind: NamedKind, elem: &Element) -> Result<bool> {
    let Some(name) = elem.child_text("name") else {
        return Ok(false);
    };
    Ok(store.insert_named(kind, &normalize(name))?.is_some())
}

pub fn label_names(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    create_named(store, NamedKind::Label, elem)
}

pub fn artist_names(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    create_named(store, NamedKind::Artist, elem)
}

pub fn parent_labels(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    let Some(name) = elem.child_text("name") else {
        return Ok(false);
    };
    // some parentLabel values carry stray whitespace
    let Some(parent_name) = elem
        .child_text("parentLabel")
        .map(str::trim)
        .filter(|p| !p.is_empty())
    else {
        return Ok(false);
    };
    let Some(label) = resolve_one(store, NamedKind::Label, name)? else {
        return Ok(false);
    };
    let Some(parent) = resolve_one(store, NamedKind::Label, parent_name)? else {
        debug!(label = %label.display_name, parent = parent_name, "Parent label not found");
        return Ok(false);
    };
    if parent.id == label.id {
        warn!(label_id = label.id, label = %label.display_name, "Label names itself as parent, skipping");
        return Ok(false);
    }
    store.set_parent_label(label.id, parent.id)?;
    Ok(true)
}

pub fn sublabels(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    let Some(name) = elem.child_text("name") else {
        return Ok(false);
    };
    let names = elem.nested_texts("sublabels", "label");
    if names.is_empty() {
        return Ok(false);
    }
    let Some(label) = resolve_one(store, NamedKind::Label, name)? else {
        return Ok(false);
    };
    let (found, had_self) = exclude_self(label.id, resolve_many(store, NamedKind::Label, names)?);
    if had_self {
        debug!(label_id = label.id, "Dropping label from its own sublabels");
    }
    let ids: Vec<i64> = found.iter().map(|l| l.id).collect();
    store.replace_sublabels(label.id, &ids)?;
    Ok(true)
}

fn artist_relation(
    store: &mut dyn Store,
    elem: &Element,
    container: &str,
    relation: &str,
    replace: fn(&mut dyn Store, i64, &[i64]) -> Result<()>,
) -> Result<bool> {
    let Some(name) = elem.child_text("name") else {
        return Ok(false);
    };
    let names = elem.nested_texts(container, "name");
    if names.is_empty() {
        return Ok(false);
    }
    let Some(artist) = resolve_one(store, NamedKind::Artist, name)? else {
        return Ok(false);
    };
    let (found, had_self) = exclude_self(artist.id, resolve_many(store, NamedKind::Artist, names)?);
    if had_self {
        warn!(artist_id = artist.id, artist = %artist.display_name, relation, "Artist lists itself, skipping self link");
    }
    let ids: Vec<i64> = found.iter().map(|a| a.id).collect();
    replace(store, artist.id, &ids)?;
    Ok(true)
}

pub fn artist_aliases(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    artist_relation(store, elem, "aliases", "alias", |s, id, ids| s.replace_aliases(id, ids))
}

pub fn artist_groups(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    artist_relation(store, elem, "groups", "group", |s, id, ids| s.replace_groups(id, ids))
}

/// A master becomes the release row for its main release, keyed by master id.
pub fn masters(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    let Some(master_id) = elem.attr("id").and_then(parse_id) else {
        return Ok(false);
    };
    let (Some(title), Some(release_id)) = (
        elem.child_text("title"),
        elem.child_text("main_release").and_then(parse_id),
    ) else {
        return Ok(false);
    };
    let release = NewRelease {
        title: title.to_string(),
        release_id,
        master_id: Some(master_id),
    };
    Ok(store.insert_release(&release)?.is_some())
}

/// Releases belonging to a master are already represented by the master row.
pub fn release_names(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    if elem.child_text("master_id").is_some() {
        return Ok(false);
    }
    let (Some(release_id), Some(title)) = (
        elem.attr("id").and_then(parse_id),
        elem.child_text("title"),
    ) else {
        return Ok(false);
    };
    let release = NewRelease {
        title: title.to_string(),
        release_id,
        master_id: None,
    };
    Ok(store.insert_release(&release)?.is_some())
}

fn target_release(store: &mut dyn Store, elem: &Element) -> Result<Option<Release>> {
    let Some(release_id) = elem.attr("id").and_then(parse_id) else {
        return Ok(None);
    };
    match elem.child_text("master_id").and_then(parse_id) {
        Some(master_id) => store.find_release_by_master_id(master_id),
        None => store.find_release_by_release_id(release_id),
    }
}

pub fn release_artists(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    let names: Vec<&str> = ["artists", "extraartists"]
        .iter()
        .flat_map(|container| elem.children_named(container))
        .flat_map(|list| list.children_named("artist"))
        .filter_map(|artist| artist.child_text("name"))
        .collect();
    if names.is_empty() {
        return Ok(false);
    }
    let Some(release) = target_release(store, elem)? else {
        return Ok(false);
    };
    let artists = resolve_many(store, NamedKind::Artist, names)?;
    if artists.is_empty() {
        return Ok(false);
    }
    let existing: FxHashSet<i64> = store.release_artist_ids(release.id)?.into_iter().collect();
    let fresh: Vec<i64> = artists
        .iter()
        .map(|a| a.id)
        .filter(|id| !existing.contains(id))
        .collect();
    if fresh.is_empty() {
        return Ok(false);
    }
    store.add_release_artists(release.id, &fresh)?;
    Ok(true)
}

pub fn release_labels(store: &mut dyn Store, elem: &Element) -> Result<bool> {
    let names: Vec<&str> = elem
        .children_named("labels")
        .flat_map(|list| list.children_named("label"))
        .filter_map(|label| label.attr("name"))
        .filter(|name| !name.trim().is_empty())
        .collect();
    if names.is_empty() {
        return Ok(false);
    }
    let Some(release) = target_release(store, elem)? else {
        return Ok(false);
    };
    let labels = resolve_many(store, NamedKind::Label, names)?;
    if labels.is_empty() {
        return Ok(false);
    }
    let existing: FxHashSet<i64> = store.release_label_ids(release.id)?.into_iter().collect();
    let fresh: Vec<i64> = labels
        .iter()
        .map(|l| l.id)
        .filter(|id| !existing.contains(id))
        .collect();
    if fresh.is_empty() {
        return Ok(false);
    }
    store.add_release_labels(release.id, &fresh)?;
    Ok(true)
}
