use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use parking_lot::RwLock;

use crate::api::{
    self, Language, Page, Post, Readiness, SearchKind, SearchResult, Session, User,
};
use crate::collections::{DetailStore, Paginated, ProfileStore};
use crate::config::Config;
use crate::data::{
    ApiFeedService, ApiInteractionService, ApiProfileService, ApiSearchService, FeedService,
    InteractionService, ProfileService, SearchService,
};
use crate::search::{Options as SearchOptions, Selection, SuggestState, Suggester};
use crate::session;
use crate::stats::Reconciler;
use crate::storage;
use crate::viewtrack::{Options as TrackOptions, Tracker, ViewSink};

/// The service seams the coordinator talks through. Production wires these
/// to the HTTP client; tests substitute their own.
pub struct Services {
    pub feed: Arc<dyn FeedService>,
    pub interactions: Arc<dyn InteractionService>,
    pub search: Arc<dyn SearchService>,
    pub profiles: Arc<dyn ProfileService>,
}

/// Registers the view against the server and folds the returned counters
/// back into every loaded copy of the post.
struct ReconcilingViewSink {
    interactions: Arc<dyn InteractionService>,
    reconciler: Arc<Reconciler>,
}

impl ViewSink for ReconcilingViewSink {
    fn register_view(&self, post_id: &str) -> Result<()> {
        let stats = self.interactions.register_view(post_id)?;
        self.reconciler.apply(&stats);
        Ok(())
    }
}

/// Top-level coordinator: owns the session, the loaded collections and the
/// background machinery, and exposes the operations a frontend drives.
pub struct App {
    config: Config,
    sessions: Arc<session::Store>,
    services: Services,

    pub feed: Arc<Paginated<Post>>,
    pub results: Arc<Paginated<SearchResult>>,
    pub detail: Arc<DetailStore>,
    pub profile: Arc<ProfileStore>,

    reconciler: Arc<Reconciler>,
    suggester: Suggester,
    tracker: Tracker,

    active_search: RwLock<Option<ActiveSearch>>,
}

#[derive(Debug, Clone)]
struct ActiveSearch {
    query: String,
    kind: SearchKind,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let store = storage::Store::open(storage::Options {
            path: config.storage.path.clone(),
        })
        .context("open local state database")?;
        let sessions = Arc::new(session::Store::open(Arc::new(store)));

        let client = Arc::new(
            api::Client::new(
                sessions.clone(),
                api::ClientConfig {
                    base_url: Some(config.api.base_url.clone()),
                    user_agent: config.api.user_agent.clone(),
                    timeout: Some(config.api.timeout),
                    http_client: None,
                },
            )
            .context("build api client")?,
        );

        let services = Services {
            feed: Arc::new(ApiFeedService::new(client.clone())),
            interactions: Arc::new(ApiInteractionService::new(client.clone())),
            search: Arc::new(ApiSearchService::new(client.clone())),
            profiles: Arc::new(ApiProfileService::new(client)),
        };

        Ok(Self::with_services(config, sessions, services))
    }

    pub fn with_services(
        config: Config,
        sessions: Arc<session::Store>,
        services: Services,
    ) -> Self {
        let feed = Arc::new(Paginated::new());
        let results = Arc::new(Paginated::new());
        let detail = Arc::new(DetailStore::new());
        let profile = Arc::new(ProfileStore::new());

        let reconciler = Arc::new(Reconciler::new(
            feed.clone(),
            results.clone(),
            detail.clone(),
            profile.clone(),
        ));

        let suggester = Suggester::new(
            services.search.clone(),
            SearchOptions {
                debounce: config.search.debounce,
                limit: config.search.suggestion_limit,
            },
        );

        let sink = Arc::new(ReconcilingViewSink {
            interactions: services.interactions.clone(),
            reconciler: reconciler.clone(),
        });
        let tracker = Tracker::new(
            sink,
            TrackOptions {
                dwell: config.tracking.dwell,
                visibility_threshold: config.tracking.visibility_threshold,
            },
        );

        App {
            config,
            sessions,
            services,
            feed,
            results,
            detail,
            profile,
            reconciler,
            suggester,
            tracker,
            active_search: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_authenticated(&self) -> bool {
        self.sessions.is_authenticated()
    }

    // --- account ---

    pub fn register(&self, email: &str, password: &str) -> Result<()> {
        let session = self
            .services
            .profiles
            .register(email, password)
            .context("register account")?;
        self.install_session(session);
        Ok(())
    }

    pub fn login(&self, email: &str, password: &str) -> Result<()> {
        let session = self
            .services
            .profiles
            .login(email, password)
            .context("log in")?;
        self.install_session(session);
        Ok(())
    }

    fn install_session(&self, session: Session) {
        self.sessions.set(Some(session));
        // New identity, new view history and loaded state.
        self.tracker.reset();
        self.clear_loaded_state();

        // Best-effort warm-up; the caller is logged in either way.
        match self.services.profiles.me() {
            Ok(user) => self
                .sessions
                .set_preferred_language(Language::normalize(&user.preferred_language)),
            Err(err) => log::warn!("fetching own profile after login failed: {err:#}"),
        }
        if let Err(err) = self.load_feed() {
            log::warn!("initial feed load failed: {err:#}");
        }
    }

    /// Drops the credential and every piece of loaded state. Also the path
    /// taken when the gateway reports an irrecoverable authorization loss.
    pub fn logout(&self) {
        self.sessions.set(None);
        self.tracker.reset();
        self.suggester.dismiss();
        self.clear_loaded_state();
    }

    fn clear_loaded_state(&self) {
        self.feed.clear();
        self.results.clear();
        self.detail.clear();
        self.profile.clear();
        *self.active_search.write() = None;
    }

    pub fn me(&self) -> Result<User> {
        self.services.profiles.me()
    }

    pub fn preferred_language(&self) -> Language {
        self.sessions.preferred_language()
    }

    /// Persists the preference locally first so the choice sticks even when
    /// the server round-trip fails.
    pub fn save_language(&self, language: Language) -> Result<Language> {
        self.sessions.set_preferred_language(language);
        let confirmed = self.services.profiles.save_language(language)?;
        if confirmed != language {
            self.sessions.set_preferred_language(confirmed);
        }
        Ok(confirmed)
    }

    // --- feed ---

    pub fn load_feed(&self) -> Result<()> {
        let page = self
            .services
            .feed
            .feed_page(0, self.config.feed.page_size)?;
        self.feed.apply_page(page, false);
        Ok(())
    }

    /// No-op while a previous load is still in flight or the feed is
    /// exhausted.
    pub fn load_more_posts(&self) -> Result<()> {
        let _guard = match self.feed.begin_load_more() {
            Some(guard) => guard,
            None => return Ok(()),
        };
        let next = self.feed.meta().page + 1;
        let page = self
            .services
            .feed
            .feed_page(next, self.config.feed.page_size)?;
        self.feed.apply_page(page, true);
        Ok(())
    }

    pub fn publish_post(&self, content: &str) -> Result<Post> {
        let post = self.services.feed.create_post(content)?;
        self.feed.prepend(post.clone());
        Ok(post)
    }

    // --- post detail ---

    /// Loads the detail view: the post itself, a view registration, and the
    /// first page of comments. Opening a post counts as viewing it without
    /// any dwell requirement; a failed registration is logged, never
    /// surfaced.
    pub fn open_post(&self, post_id: &str) -> Result<()> {
        self.detail.clear();
        let post = self.services.feed.fetch_post(post_id)?;
        self.detail.set_post(post);

        match self.services.interactions.register_view(post_id) {
            Ok(stats) => self.reconciler.apply(&stats),
            Err(err) => log::warn!("view registration for {post_id} failed: {err:#}"),
        }

        let comments = self
            .services
            .feed
            .comments_page(post_id, 0, self.config.feed.page_size)?;
        self.detail.comments().apply_page(comments, false);
        Ok(())
    }

    pub fn load_more_comments(&self) -> Result<()> {
        let post = match self.detail.post() {
            Some(post) => post,
            None => return Ok(()),
        };
        let _guard = match self.detail.comments().begin_load_more() {
            Some(guard) => guard,
            None => return Ok(()),
        };
        let next = self.detail.comments().meta().page + 1;
        let page = self
            .services
            .feed
            .comments_page(&post.id, next, self.config.feed.page_size)?;
        self.detail.comments().apply_page(page, true);
        Ok(())
    }

    pub fn submit_comment(&self, post_id: &str, content: &str) -> Result<()> {
        let comment = self.services.feed.create_comment(post_id, content)?;
        self.detail.comments().prepend(comment);
        self.reconciler.bump_comment_count(post_id);
        self.detail.update_post(post_id, |post| post.comments += 1);
        Ok(())
    }

    // --- interactions ---

    /// Likes or unlikes depending on the flag the caller currently renders.
    /// The server's counters win; the liked flag flips optimistically since
    /// the stats payload does not carry it.
    pub fn toggle_like(&self, post_id: &str, currently_liked: bool) -> Result<()> {
        let stats = if currently_liked {
            self.services.interactions.unlike(post_id)?
        } else {
            self.services.interactions.like(post_id)?
        };
        self.reconciler.apply_like_toggle(&stats, !currently_liked);
        Ok(())
    }

    /// Feeds a visibility measurement into the dwell tracker.
    pub fn post_visibility(&self, post_id: &str, ratio: f64) {
        self.tracker.visibility(post_id, ratio);
    }

    // --- search ---

    pub fn search_input(&self, text: &str) {
        self.suggester.input(text);
    }

    pub fn suggest_state(&self) -> SuggestState {
        self.suggester.state()
    }

    pub fn set_search_kind(&self, kind: SearchKind) {
        self.suggester.set_kind(kind);
    }

    pub fn dismiss_suggestions(&self) {
        self.suggester.dismiss();
    }

    /// A post suggestion already on screen becomes a scroll; anything else
    /// opens a full search for the suggestion's text.
    pub fn select_suggestion(&self, suggestion: &api::Suggestion) -> Selection {
        self.suggester.dismiss();
        if suggestion.kind == api::ItemKind::Post
            && self.feed.items().iter().any(|post| post.id == suggestion.id)
        {
            return Selection::ScrollTo {
                post_id: suggestion.id.clone(),
            };
        }
        Selection::OpenSearch {
            query: suggestion.title.clone(),
            kind: self.suggester.kind(),
        }
    }

    pub fn open_search(&self, query: &str, kind: SearchKind) -> Result<()> {
        let page = self
            .services
            .search
            .results_page(query, kind, 0, self.config.feed.page_size)?;
        self.results.apply_page(result_page(page), false);
        *self.active_search.write() = Some(ActiveSearch {
            query: query.to_string(),
            kind,
        });
        Ok(())
    }

    pub fn load_more_search_results(&self) -> Result<()> {
        let active = match self.active_search.read().clone() {
            Some(active) => active,
            None => return Ok(()),
        };
        let _guard = match self.results.begin_load_more() {
            Some(guard) => guard,
            None => return Ok(()),
        };
        let next = self.results.meta().page + 1;
        let page = self.services.search.results_page(
            &active.query,
            active.kind,
            next,
            self.config.feed.page_size,
        )?;
        self.results.apply_page(result_page(page), true);
        Ok(())
    }

    // --- profiles ---

    pub fn open_user_profile(&self, user_id: &str) -> Result<()> {
        let profile = self
            .services
            .profiles
            .public_profile(user_id, self.config.profile.recent_posts_limit)?;
        self.profile.set(profile);
        Ok(())
    }

    // --- health ---

    pub fn check_readiness(&self) -> Result<Readiness> {
        let readiness =
            api::fetch_readiness(&self.config.api.base_url, self.config.api.timeout)
                .context("fetch readiness")?;
        Ok(readiness)
    }
}

fn result_page(page: api::SearchPage) -> Page<SearchResult> {
    Page {
        items: page.items,
        page: page.page,
        size: page.size,
        total_elements: page.total_elements,
        total_pages: page.total_pages,
    }
}

pub fn check_readiness(base_url: &str, timeout: Duration) -> Result<Readiness> {
    api::fetch_readiness(base_url, timeout).context("fetch readiness")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{Comment, PostStats, PublicProfile, SearchPage, Suggestion};
    use anyhow::bail;
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn post(id: &str) -> Post {
        Post {
            id: id.into(),
            author_id: Some("u1".into()),
            author_display_name: "Ana".into(),
            content: format!("post {}", id),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            likes: 0,
            views: 0,
            comments: 0,
            liked_by_me: false,
        }
    }

    fn comment(id: &str, post_id: &str) -> Comment {
        Comment {
            id: id.into(),
            post_id: post_id.into(),
            user_id: "u1".into(),
            user_display_name: "Ana".into(),
            content: "hola".into(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Serves two fixed feed pages and canned detail data; counts calls.
    struct FakeFeedService {
        feed_calls: AtomicUsize,
    }

    impl FakeFeedService {
        fn new() -> Self {
            FakeFeedService {
                feed_calls: AtomicUsize::new(0),
            }
        }
    }

    impl FeedService for FakeFeedService {
        fn feed_page(&self, page: i32, size: i32) -> Result<Page<Post>> {
            self.feed_calls.fetch_add(1, Ordering::SeqCst);
            let items = match page {
                0 => vec![post("a"), post("b")],
                1 => vec![post("b"), post("c")],
                _ => bail!("unexpected page {page}"),
            };
            Ok(Page {
                items,
                page,
                size,
                total_elements: 4,
                total_pages: 2,
            })
        }

        fn create_post(&self, content: &str) -> Result<Post> {
            let mut created = post("new");
            created.content = content.to_string();
            Ok(created)
        }

        fn fetch_post(&self, post_id: &str) -> Result<Post> {
            Ok(post(post_id))
        }

        fn comments_page(&self, post_id: &str, page: i32, size: i32) -> Result<Page<Comment>> {
            Ok(Page {
                items: vec![comment("c1", post_id)],
                page,
                size,
                total_elements: 1,
                total_pages: 1,
            })
        }

        fn create_comment(&self, post_id: &str, content: &str) -> Result<Comment> {
            let mut created = comment("c-new", post_id);
            created.content = content.to_string();
            Ok(created)
        }
    }

    struct FakeInteractionService {
        likes: AtomicUsize,
        unlikes: AtomicUsize,
        views: AtomicUsize,
    }

    impl FakeInteractionService {
        fn new() -> Self {
            FakeInteractionService {
                likes: AtomicUsize::new(0),
                unlikes: AtomicUsize::new(0),
                views: AtomicUsize::new(0),
            }
        }

        fn stats(post_id: &str, likes: i64) -> PostStats {
            PostStats {
                post_id: post_id.into(),
                likes,
                views: 10,
                comments: 0,
            }
        }
    }

    impl InteractionService for FakeInteractionService {
        fn like(&self, post_id: &str) -> Result<PostStats> {
            self.likes.fetch_add(1, Ordering::SeqCst);
            Ok(Self::stats(post_id, 1))
        }

        fn unlike(&self, post_id: &str) -> Result<PostStats> {
            self.unlikes.fetch_add(1, Ordering::SeqCst);
            Ok(Self::stats(post_id, 0))
        }

        fn register_view(&self, post_id: &str) -> Result<PostStats> {
            self.views.fetch_add(1, Ordering::SeqCst);
            Ok(Self::stats(post_id, 0))
        }
    }

    struct FakeSearchService;

    impl SearchService for FakeSearchService {
        fn suggestions(
            &self,
            query: &str,
            kind: SearchKind,
            _limit: u32,
        ) -> Result<Vec<Suggestion>> {
            let _ = (query, kind);
            Ok(Vec::new())
        }

        fn results_page(
            &self,
            query: &str,
            kind: SearchKind,
            page: i32,
            size: i32,
        ) -> Result<SearchPage> {
            let id = format!("r{}", page);
            Ok(SearchPage {
                query: query.to_string(),
                kind,
                items: vec![SearchResult {
                    id,
                    kind: api::ItemKind::Post,
                    primary_text: "hola".into(),
                    secondary_text: "Ana".into(),
                    created_at: Utc::now(),
                    posts: 0,
                    likes: 0,
                    views: 0,
                    comments: 0,
                    liked_by_me: false,
                }],
                page,
                size,
                total_elements: 2,
                total_pages: 2,
            })
        }
    }

    struct FakeProfileService {
        session: Mutex<Option<Session>>,
        recent_posts_limit: AtomicUsize,
    }

    impl FakeProfileService {
        fn new() -> Self {
            FakeProfileService {
                session: Mutex::new(None),
                recent_posts_limit: AtomicUsize::new(0),
            }
        }
    }

    impl ProfileService for FakeProfileService {
        fn register(&self, email: &str, _password: &str) -> Result<Session> {
            self.login(email, _password)
        }

        fn login(&self, _email: &str, _password: &str) -> Result<Session> {
            let session = Session {
                access_token: "access".into(),
                refresh_token: "refresh".into(),
                token_type: "Bearer".into(),
                access_token_expires_at: 0,
                refresh_token_expires_at: 0,
            };
            *self.session.lock() = Some(session.clone());
            Ok(session)
        }

        fn me(&self) -> Result<User> {
            Ok(User {
                id: "u1".into(),
                email: "ana@example.com".into(),
                role: "USER".into(),
                preferred_language: "es".into(),
            })
        }

        fn save_language(&self, language: Language) -> Result<Language> {
            Ok(language)
        }

        fn public_profile(&self, user_id: &str, limit: u32) -> Result<PublicProfile> {
            self.recent_posts_limit
                .store(limit as usize, Ordering::SeqCst);
            Ok(PublicProfile {
                id: user_id.into(),
                email: "ana@example.com".into(),
                role: "USER".into(),
                preferred_language: "es".into(),
                created_at: Utc::now(),
                posts: 1,
                likes: 0,
                comments: 0,
                views: 0,
                recent_posts: vec![post("a")],
            })
        }
    }

    struct Fixture {
        app: App,
        feed: Arc<FakeFeedService>,
        interactions: Arc<FakeInteractionService>,
        profiles: Arc<FakeProfileService>,
        sessions: Arc<session::Store>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            storage::Store::open(storage::Options {
                path: Some(dir.path().join("state.db")),
            })
            .unwrap(),
        );
        let sessions = Arc::new(session::Store::open(storage));
        let feed = Arc::new(FakeFeedService::new());
        let interactions = Arc::new(FakeInteractionService::new());
        let profiles = Arc::new(FakeProfileService::new());
        let services = Services {
            feed: feed.clone(),
            interactions: interactions.clone(),
            search: Arc::new(FakeSearchService),
            profiles: profiles.clone(),
        };
        let app = App::with_services(Config::default(), sessions.clone(), services);
        Fixture {
            app,
            feed,
            interactions,
            profiles,
            sessions,
            _dir: dir,
        }
    }

    #[test]
    fn feed_load_and_load_more_merge_without_duplicates() {
        let fx = fixture();
        fx.app.load_feed().unwrap();
        assert_eq!(fx.app.feed.len(), 2);

        fx.app.load_more_posts().unwrap();
        let ids: Vec<String> = fx.app.feed.items().iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        // Exhausted: no further requests go out.
        fx.app.load_more_posts().unwrap();
        assert_eq!(fx.feed.feed_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn publish_prepends_created_post() {
        let fx = fixture();
        fx.app.load_feed().unwrap();
        let created = fx.app.publish_post("fresh content").unwrap();
        assert_eq!(created.content, "fresh content");
        assert_eq!(fx.app.feed.items()[0].id, "new");
    }

    #[test]
    fn toggle_like_routes_by_current_state_and_flips_flag() {
        let fx = fixture();
        fx.app.load_feed().unwrap();

        fx.app.toggle_like("a", false).unwrap();
        assert_eq!(fx.interactions.likes.load(Ordering::SeqCst), 1);
        let feed = fx.app.feed.items();
        assert!(feed[0].liked_by_me);
        assert_eq!(feed[0].likes, 1);

        fx.app.toggle_like("a", true).unwrap();
        assert_eq!(fx.interactions.unlikes.load(Ordering::SeqCst), 1);
        assert!(!fx.app.feed.items()[0].liked_by_me);
    }

    #[test]
    fn open_post_registers_view_and_loads_comments() {
        let fx = fixture();
        fx.app.open_post("a").unwrap();
        assert_eq!(fx.interactions.views.load(Ordering::SeqCst), 1);
        assert_eq!(fx.app.detail.post().unwrap().id, "a");
        assert_eq!(fx.app.detail.comments().len(), 1);
    }

    #[test]
    fn submit_comment_prepends_and_bumps_counts() {
        let fx = fixture();
        fx.app.load_feed().unwrap();
        fx.app.open_post("a").unwrap();

        fx.app.submit_comment("a", "nice").unwrap();
        assert_eq!(fx.app.detail.comments().items()[0].id, "c-new");
        assert_eq!(fx.app.detail.post().unwrap().comments, 1);
        assert_eq!(fx.app.feed.items()[0].comments, 1);
    }

    #[test]
    fn search_pagination_tracks_the_active_query() {
        let fx = fixture();
        // Without an open search, load-more is a no-op.
        fx.app.load_more_search_results().unwrap();
        assert!(fx.app.results.is_empty());

        fx.app.open_search("hola", SearchKind::Posts).unwrap();
        assert_eq!(fx.app.results.len(), 1);
        fx.app.load_more_search_results().unwrap();
        let ids: Vec<String> = fx.app.results.items().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["r0", "r1"]);
    }

    #[test]
    fn select_suggestion_scrolls_when_post_is_loaded() {
        let fx = fixture();
        fx.app.load_feed().unwrap();

        let loaded = Suggestion {
            id: "a".into(),
            kind: api::ItemKind::Post,
            title: "post a".into(),
            subtitle: String::new(),
        };
        assert_eq!(
            fx.app.select_suggestion(&loaded),
            Selection::ScrollTo {
                post_id: "a".into()
            }
        );

        let elsewhere = Suggestion {
            id: "zz".into(),
            kind: api::ItemKind::Post,
            title: "far away".into(),
            subtitle: String::new(),
        };
        assert_eq!(
            fx.app.select_suggestion(&elsewhere),
            Selection::OpenSearch {
                query: "far away".into(),
                kind: SearchKind::Posts
            }
        );
    }

    #[test]
    fn profile_fetch_uses_the_recent_posts_limit() {
        let fx = fixture();
        fx.app.open_user_profile("u1").unwrap();
        assert_eq!(fx.app.profile.get().unwrap().id, "u1");
        assert_eq!(
            fx.profiles.recent_posts_limit.load(Ordering::SeqCst),
            fx.app.config().profile.recent_posts_limit as usize
        );
    }

    #[test]
    fn login_then_logout_round_trips_session_and_state() {
        let fx = fixture();
        assert!(!fx.app.is_authenticated());

        fx.app.login("ana@example.com", "secret").unwrap();
        assert!(fx.app.is_authenticated());
        assert!(fx.sessions.get().is_some());

        fx.app.load_feed().unwrap();
        fx.app.open_search("hola", SearchKind::Posts).unwrap();
        fx.app.logout();

        assert!(!fx.app.is_authenticated());
        assert!(fx.sessions.get().is_none());
        assert!(fx.app.feed.is_empty());
        assert!(fx.app.results.is_empty());
        assert!(fx.app.detail.post().is_none());
    }
}
