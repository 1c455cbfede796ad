use std::collections::HashSet;

use parking_lot::{Mutex, RwLock};

use crate::api::{Comment, Page, Post, PublicProfile, SearchResult};

/// Identity used for page merging. A post id is unique across the feed; a
/// search result id is unique within its kind, which is all one collection
/// ever holds.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for Post {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for Comment {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for SearchResult {
    fn key(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub page: i32,
    pub total_pages: i32,
    pub total_elements: i64,
}

impl<T> From<&Page<T>> for PageMeta {
    fn from(page: &Page<T>) -> Self {
        PageMeta {
            page: page.page,
            total_pages: page.total_pages,
            total_elements: page.total_elements,
        }
    }
}

/// Append-mode merge: keeps `current` in order, then appends each incoming
/// item whose id is not already present. Protects against a duplicated
/// "load more" and against the same item straddling two server pages.
pub fn merge_by_key<T: Keyed>(current: Vec<T>, incoming: Vec<T>) -> Vec<T> {
    let mut known: HashSet<String> = current.iter().map(|item| item.key().to_string()).collect();
    let mut merged = current;
    for item in incoming {
        if known.insert(item.key().to_string()) {
            merged.push(item);
        }
    }
    merged
}

/// One client-held paginated collection. Writes replace the item vector
/// wholesale under the write lock; metadata always reflects the latest
/// server response.
pub struct Paginated<T> {
    items: RwLock<Vec<T>>,
    meta: RwLock<PageMeta>,
    busy: Mutex<bool>,
}

impl<T: Keyed + Clone> Paginated<T> {
    pub fn new() -> Self {
        Paginated {
            items: RwLock::new(Vec::new()),
            meta: RwLock::new(PageMeta::default()),
            busy: Mutex::new(false),
        }
    }

    pub fn apply_page(&self, page: Page<T>, append: bool) {
        let meta = PageMeta::from(&page);
        {
            // One guard across the whole merge; readers see either the old
            // vector or the merged one, never an intermediate.
            let mut items = self.items.write();
            if append {
                let current = std::mem::take(&mut *items);
                *items = merge_by_key(current, page.items);
            } else {
                *items = page.items;
            }
        }
        *self.meta.write() = meta;
    }

    pub fn items(&self) -> Vec<T> {
        self.items.read().clone()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    pub fn meta(&self) -> PageMeta {
        *self.meta.read()
    }

    pub fn has_more(&self) -> bool {
        let meta = self.meta.read();
        meta.total_pages > 0 && meta.page + 1 < meta.total_pages
    }

    /// Serializes page application: returns None while another load is in
    /// flight or when the collection is exhausted. Dropping the guard
    /// releases the flag.
    pub fn begin_load_more(&self) -> Option<LoadGuard<'_>> {
        if !self.has_more() {
            return None;
        }
        let mut busy = self.busy.lock();
        if *busy {
            return None;
        }
        *busy = true;
        Some(LoadGuard { busy: &self.busy })
    }

    pub fn prepend(&self, item: T) {
        self.items.write().insert(0, item);
        self.meta.write().total_elements += 1;
    }

    pub fn update<F>(&self, key: &str, f: F) -> bool
    where
        F: Fn(&mut T),
    {
        let mut items = self.items.write();
        let mut touched = false;
        for item in items.iter_mut() {
            if item.key() == key {
                f(item);
                touched = true;
            }
        }
        touched
    }

    pub fn clear(&self) {
        *self.items.write() = Vec::new();
        *self.meta.write() = PageMeta::default();
    }
}

impl<T: Keyed + Clone> Default for Paginated<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoadGuard<'a> {
    busy: &'a Mutex<bool>,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        *self.busy.lock() = false;
    }
}

/// Detail view: one post plus its paginated comments.
pub struct DetailStore {
    post: RwLock<Option<Post>>,
    comments: Paginated<Comment>,
}

impl DetailStore {
    pub fn new() -> Self {
        DetailStore {
            post: RwLock::new(None),
            comments: Paginated::new(),
        }
    }

    pub fn set_post(&self, post: Post) {
        *self.post.write() = Some(post);
    }

    pub fn post(&self) -> Option<Post> {
        self.post.read().clone()
    }

    pub fn update_post<F>(&self, post_id: &str, f: F) -> bool
    where
        F: Fn(&mut Post),
    {
        let mut slot = self.post.write();
        match slot.as_mut() {
            Some(post) if post.id == post_id => {
                f(post);
                true
            }
            _ => false,
        }
    }

    pub fn comments(&self) -> &Paginated<Comment> {
        &self.comments
    }

    pub fn clear(&self) {
        *self.post.write() = None;
        self.comments.clear();
    }
}

impl Default for DetailStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Another user's public profile, including their recent posts. Replaced
/// wholesale on every navigation.
pub struct ProfileStore {
    profile: RwLock<Option<PublicProfile>>,
}

impl ProfileStore {
    pub fn new() -> Self {
        ProfileStore {
            profile: RwLock::new(None),
        }
    }

    pub fn set(&self, profile: PublicProfile) {
        *self.profile.write() = Some(profile);
    }

    pub fn get(&self) -> Option<PublicProfile> {
        self.profile.read().clone()
    }

    pub fn update_recent_post<F>(&self, post_id: &str, f: F) -> bool
    where
        F: Fn(&mut Post),
    {
        let mut slot = self.profile.write();
        let mut touched = false;
        if let Some(profile) = slot.as_mut() {
            for post in profile.recent_posts.iter_mut() {
                if post.id == post_id {
                    f(post);
                    touched = true;
                }
            }
        }
        touched
    }

    pub fn clear(&self) {
        *self.profile.write() = None;
    }
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}
