use anyhow::{Context, Result};
use std::sync::Arc;

use crate::api::{
    self, Comment, Language, Page, Post, PostStats, PublicProfile, SearchKind, SearchPage,
    Session, Suggestion, User,
};

pub trait FeedService: Send + Sync {
    fn feed_page(&self, page: i32, size: i32) -> Result<Page<Post>>;
    fn create_post(&self, content: &str) -> Result<Post>;
    fn fetch_post(&self, post_id: &str) -> Result<Post>;
    fn comments_page(&self, post_id: &str, page: i32, size: i32) -> Result<Page<Comment>>;
    fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment>;
}

pub trait InteractionService: Send + Sync {
    fn like(&self, post_id: &str) -> Result<PostStats>;
    fn unlike(&self, post_id: &str) -> Result<PostStats>;
    fn register_view(&self, post_id: &str) -> Result<PostStats>;
}

pub trait SearchService: Send + Sync {
    fn suggestions(&self, query: &str, kind: SearchKind, limit: u32) -> Result<Vec<Suggestion>>;
    fn results_page(
        &self,
        query: &str,
        kind: SearchKind,
        page: i32,
        size: i32,
    ) -> Result<SearchPage>;
}

pub trait ProfileService: Send + Sync {
    fn register(&self, email: &str, password: &str) -> Result<Session>;
    fn login(&self, email: &str, password: &str) -> Result<Session>;
    fn me(&self) -> Result<User>;
    fn save_language(&self, language: Language) -> Result<Language>;
    fn public_profile(&self, user_id: &str, recent_posts_limit: u32) -> Result<PublicProfile>;
}

pub struct ApiFeedService {
    client: Arc<api::Client>,
}

impl ApiFeedService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl FeedService for ApiFeedService {
    fn feed_page(&self, page: i32, size: i32) -> Result<Page<Post>> {
        self.client.feed(page, size).context("fetch feed page")
    }

    fn create_post(&self, content: &str) -> Result<Post> {
        self.client.create_post(content).context("create post")
    }

    fn fetch_post(&self, post_id: &str) -> Result<Post> {
        self.client.post(post_id).context("fetch post")
    }

    fn comments_page(&self, post_id: &str, page: i32, size: i32) -> Result<Page<Comment>> {
        self.client
            .comments(post_id, page, size)
            .context("fetch comments page")
    }

    fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment> {
        self.client
            .create_comment(post_id, content)
            .context("create comment")
    }
}

pub struct ApiInteractionService {
    client: Arc<api::Client>,
}

impl ApiInteractionService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl InteractionService for ApiInteractionService {
    fn like(&self, post_id: &str) -> Result<PostStats> {
        self.client.like(post_id).context("like post")
    }

    fn unlike(&self, post_id: &str) -> Result<PostStats> {
        self.client.unlike(post_id).context("unlike post")
    }

    fn register_view(&self, post_id: &str) -> Result<PostStats> {
        self.client.register_view(post_id).context("register view")
    }
}

pub struct ApiSearchService {
    client: Arc<api::Client>,
}

impl ApiSearchService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl SearchService for ApiSearchService {
    fn suggestions(&self, query: &str, kind: SearchKind, limit: u32) -> Result<Vec<Suggestion>> {
        let payload = self
            .client
            .suggestions(query, kind, limit)
            .context("fetch suggestions")?;
        Ok(payload.items)
    }

    fn results_page(
        &self,
        query: &str,
        kind: SearchKind,
        page: i32,
        size: i32,
    ) -> Result<SearchPage> {
        self.client
            .search(query, kind, page, size)
            .context("fetch search results")
    }
}

pub struct ApiProfileService {
    client: Arc<api::Client>,
}

impl ApiProfileService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl ProfileService for ApiProfileService {
    fn register(&self, email: &str, password: &str) -> Result<Session> {
        self.client
            .register(email, password)
            .context("register account")
    }

    fn login(&self, email: &str, password: &str) -> Result<Session> {
        self.client.login(email, password).context("log in")
    }

    fn me(&self) -> Result<User> {
        self.client.me().context("fetch current user")
    }

    fn save_language(&self, language: Language) -> Result<Language> {
        self.client
            .set_language(language)
            .context("save language preference")
    }

    fn public_profile(&self, user_id: &str, recent_posts_limit: u32) -> Result<PublicProfile> {
        self.client
            .user_profile(user_id, recent_posts_limit)
            .context("fetch public profile")
    }
}
