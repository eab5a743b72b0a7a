use crate::models::{Name, NamedEntity, NamedKind, NewRelease, Release};
use anyhow::Result;

/// The storage side of the import.
///
/// Writes accumulate in an open transaction until [`Store::commit`]. Stores may
/// cache looked-up entities; [`Store::evict_all`] drops that cache so a long
/// pass keeps a bounded working set.
pub trait Store {
    /// Inserts a label or artist. `Ok(None)` means the name already existed and
    /// the store is configured to skip collisions.
    fn insert_named(&mut self, kind: NamedKind, name: &Name) -> Result<Option<NamedEntity>>;

    /// Inserts a release; `Ok(None)` on a skipped key collision.
    fn insert_release(&mut self, release: &NewRelease) -> Result<Option<Release>>;

    fn find_by_name(&mut self, kind: NamedKind, key: &str) -> Result<Option<NamedEntity>>;

    /// Looks up every normalized key; keys with no entity are left out.
    fn find_all_by_names(&mut self, kind: NamedKind, keys: &[String]) -> Result<Vec<NamedEntity>>;

    fn find_release_by_release_id(&mut self, release_id: i64) -> Result<Option<Release>>;

    fn find_release_by_master_id(&mut self, master_id: i64) -> Result<Option<Release>>;

    fn set_parent_label(&mut self, label_id: i64, parent_id: i64) -> Result<()>;

    /// Makes `sublabel_ids` exactly the set of labels whose parent is `label_id`.
    fn replace_sublabels(&mut self, label_id: i64, sublabel_ids: &[i64]) -> Result<()>;

    fn replace_aliases(&mut self, artist_id: i64, alias_ids: &[i64]) -> Result<()>;

    fn replace_groups(&mut self, artist_id: i64, group_ids: &[i64]) -> Result<()>;

    fn release_artist_ids(&mut self, release_pk: i64) -> Result<Vec<i64>>;

    fn add_release_artists(&mut self, release_pk: i64, artist_ids: &[i64]) -> Result<()>;

    fn release_label_ids(&mut self, release_pk: i64) -> Result<Vec<i64>>;

    fn add_release_labels(&mut self, release_pk: i64, label_ids: &[i64]) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn evict_all(&mut self);
}
