use std::sync::Arc;

use crate::api::{ItemKind, Post, PostStats, SearchResult};
use crate::collections::{DetailStore, Paginated, ProfileStore};

/// Fans a mutation's returned counters out to every in-memory collection
/// that may hold a copy of the post. Copies are independent, so each store
/// is updated explicitly; after any successful mutation response all of
/// them converge on the server-reported values.
pub struct Reconciler {
    feed: Arc<Paginated<Post>>,
    results: Arc<Paginated<SearchResult>>,
    detail: Arc<DetailStore>,
    profile: Arc<ProfileStore>,
}

impl Reconciler {
    pub fn new(
        feed: Arc<Paginated<Post>>,
        results: Arc<Paginated<SearchResult>>,
        detail: Arc<DetailStore>,
        profile: Arc<ProfileStore>,
    ) -> Self {
        Reconciler {
            feed,
            results,
            detail,
            profile,
        }
    }

    /// Overwrites likes/views/comments on every copy of the post; all other
    /// fields are left untouched.
    pub fn apply(&self, stats: &PostStats) {
        self.feed.update(&stats.post_id, |post| {
            copy_stats(post, stats);
        });
        self.results.update(&stats.post_id, |item| {
            if item.kind == ItemKind::Post {
                copy_result_stats(item, stats);
            }
        });
        self.detail.update_post(&stats.post_id, |post| {
            copy_stats(post, stats);
        });
        self.profile.update_recent_post(&stats.post_id, |post| {
            copy_stats(post, stats);
        });
    }

    /// Stats application plus the optimistic liked-flag flip. The server's
    /// stats payload carries no liked-state, so the caller passes the
    /// negation of the pre-mutation flag.
    pub fn apply_like_toggle(&self, stats: &PostStats, now_liked: bool) {
        self.feed.update(&stats.post_id, |post| {
            copy_stats(post, stats);
            post.liked_by_me = now_liked;
        });
        self.results.update(&stats.post_id, |item| {
            if item.kind == ItemKind::Post {
                copy_result_stats(item, stats);
                item.liked_by_me = now_liked;
            }
        });
        self.detail.update_post(&stats.post_id, |post| {
            copy_stats(post, stats);
            post.liked_by_me = now_liked;
        });
        self.profile.update_recent_post(&stats.post_id, |post| {
            copy_stats(post, stats);
            post.liked_by_me = now_liked;
        });
    }

    /// Local comment-count bump after a successful comment creation; the
    /// authoritative value arrives with the next stats payload.
    pub fn bump_comment_count(&self, post_id: &str) {
        self.feed.update(post_id, |post| {
            post.comments += 1;
        });
    }
}

fn copy_stats(post: &mut Post, stats: &PostStats) {
    post.likes = stats.likes;
    post.views = stats.views;
    post.comments = stats.comments;
}

fn copy_result_stats(item: &mut SearchResult, stats: &PostStats) {
    item.likes = stats.likes;
    item.views = stats.views;
    item.comments = stats.comments;
}
