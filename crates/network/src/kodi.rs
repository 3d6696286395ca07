//! Kodi as the host media application, reached over HTTP JSON-RPC
//!
//! Library state (play counts, resume points) and favorites go through the
//! JSON-RPC API. Kodi has no call for removing a favorite, so removals rewrite
//! `favourites.xml` in the profile's userdata directory.

use crate::client::{Client, ClientConfig};
use crate::error::{NetworkError, NetworkResult};
use async_trait::async_trait;
use cloudsync_core::favorites::{add_missing, parse_favourites, remove_by_title, render_favourites};
use cloudsync_core::{
    ActionDescriptor, AppError, ContentId, FavoriteEntry, HostPaths, MediaHost, MediaKind,
    Result, ResumePoint, WatchedItem,
};
use cloudsync_resilience::RetryPolicy;
use directories::BaseDirs;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Window id of Kodi's favourites browser
const FAVOURITES_WINDOW_ID: i64 = 10134;

const MOVIE_IDENTITY: [&str; 4] = ["title", "year", "imdbnumber", "uniqueid"];
const SHOW_IDENTITY: [&str; 2] = ["title", "uniqueid"];

/// Connection settings for `KodiHost`
#[derive(Debug, Clone)]
pub struct KodiSettings {
    /// JSON-RPC endpoint, e.g. `http://localhost:8080/jsonrpc`
    pub rpc_url: String,
    pub username: String,
    pub password: String,
    /// Overrides userdata discovery
    pub userdata_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl KodiSettings {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            username: String::new(),
            password: String::new(),
            userdata_dir: None,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_userdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.userdata_dir = Some(dir.into());
        self
    }
}

/// `MediaHost` implementation for Kodi
pub struct KodiHost {
    client: Client,
    settings: KodiSettings,
    next_id: AtomicU64,
    paths: OnceLock<HostPaths>,
}

impl KodiHost {
    pub fn new(settings: KodiSettings) -> NetworkResult<Self> {
        let config = ClientConfig {
            retry_policy: Some(RetryPolicy::new(2).with_initial_delay(Duration::from_millis(250))),
            ..ClientConfig::default().with_timeout(settings.timeout)
        };
        Ok(Self {
            client: Client::with_config(config)?,
            settings,
            next_id: AtomicU64::new(1),
            paths: OnceLock::new(),
        })
    }

    /// Sends one JSON-RPC request and returns its `result`
    pub async fn call(&self, method: &str, params: Value) -> NetworkResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = self
            .client
            .send(|http| {
                let builder = http.post(&self.settings.rpc_url).json(&request);
                if self.settings.username.is_empty() {
                    builder
                } else {
                    builder.basic_auth(&self.settings.username, Some(&self.settings.password))
                }
            })
            .await?;
        let body: Value = response.json().await?;
        rpc_result(method, body)
    }

    /// Checks that the JSON-RPC endpoint answers
    pub async fn ping(&self) -> Result<()> {
        self.call("JSONRPC.Ping", json!({})).await.map_err(host_error)?;
        Ok(())
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        self.call(method, params).await.map_err(host_error)
    }

    async fn paths(&self) -> Result<HostPaths> {
        if let Some(paths) = self.paths.get() {
            return Ok(paths.clone());
        }
        self.probe_paths().await
    }

    async fn show_identities(&self) -> Result<HashMap<i64, ContentId>> {
        let result = self
            .rpc("VideoLibrary.GetTVShows", json!({ "properties": SHOW_IDENTITY }))
            .await?;
        Ok(parse_show_identities(&result))
    }

    async fn find_movie(&self, id: &ContentId) -> Result<Option<i64>> {
        let result = self
            .rpc("VideoLibrary.GetMovies", json!({ "properties": MOVIE_IDENTITY }))
            .await?;
        let found = items(&result, "movies")
            .find(|movie| movie_identity(movie).as_ref() == Some(id))
            .and_then(|movie| movie["movieid"].as_i64());
        Ok(found)
    }

    async fn find_episode(&self, id: &ContentId) -> Result<Option<i64>> {
        let shows = self.show_identities().await?;
        for (show_id, show) in shows {
            if !id.as_str().starts_with(&format!("{}/", show)) {
                continue;
            }
            let result = self
                .rpc(
                    "VideoLibrary.GetEpisodes",
                    json!({ "tvshowid": show_id, "properties": ["season", "episode"] }),
                )
                .await?;
            let found = items(&result, "episodes").find(|ep| {
                let season = ep["season"].as_u64().unwrap_or(0) as u32;
                let episode = ep["episode"].as_u64().unwrap_or(0) as u32;
                &ContentId::for_episode(&show, season, episode) == id
            });
            if let Some(ep) = found {
                return Ok(ep["episodeid"].as_i64());
            }
        }
        Ok(None)
    }

    async fn find_by_file(&self, kind: MediaKind, file: &str) -> Result<Option<i64>> {
        let (method, list, key) = match kind {
            MediaKind::Movie => ("VideoLibrary.GetMovies", "movies", "movieid"),
            MediaKind::Episode => ("VideoLibrary.GetEpisodes", "episodes", "episodeid"),
        };
        let result = self.rpc(method, json!({ "properties": ["file"] })).await?;
        let found = items(&result, list)
            .find(|item| item["file"].as_str() == Some(file))
            .and_then(|item| item[key].as_i64());
        Ok(found)
    }

    async fn library_id(&self, kind: MediaKind, id: &ContentId) -> Result<i64> {
        let found = match kind {
            MediaKind::Movie => self.find_movie(id).await?,
            MediaKind::Episode => self.find_episode(id).await?,
        };
        found.ok_or_else(|| AppError::HostItemNotFound {
            kind: kind.to_string(),
            identifier: id.to_string(),
        })
    }

    async fn set_details(&self, kind: MediaKind, library_id: i64, mut details: Value) -> Result<()> {
        let method = match kind {
            MediaKind::Movie => {
                details["movieid"] = json!(library_id);
                "VideoLibrary.SetMovieDetails"
            }
            MediaKind::Episode => {
                details["episodeid"] = json!(library_id);
                "VideoLibrary.SetEpisodeDetails"
            }
        };
        self.rpc(method, details).await?;
        Ok(())
    }

    async fn rewrite_favourites<F>(&self, edit: F) -> Result<bool>
    where
        F: FnOnce(&mut Vec<FavoriteEntry>) -> bool,
    {
        let path = self.paths().await?.favourites_file();
        let mut entries = match tokio::fs::read_to_string(&path).await {
            Ok(xml) => parse_favourites(&xml)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(AppError::io_at(path, e)),
        };
        if !edit(&mut entries) {
            return Ok(false);
        }

        let xml = render_favourites(&entries);
        tokio::task::spawn_blocking(move || write_atomically(&path, xml.as_bytes()))
            .await
            .map_err(|e| AppError::InternalError {
                message: format!("favourites write task failed: {}", e),
            })??;

        if let Err(e) = self.refresh_favorites().await {
            log::debug!("Favourites refresh failed: {}", e);
        }
        Ok(true)
    }
}

#[async_trait]
impl MediaHost for KodiHost {
    fn name(&self) -> &str {
        "kodi"
    }

    async fn probe_paths(&self) -> Result<HostPaths> {
        if let Some(paths) = self.paths.get() {
            return Ok(paths.clone());
        }

        let dir = match &self.settings.userdata_dir {
            Some(dir) => {
                if !dir.is_dir() {
                    log::warn!("Configured userdata directory {} does not exist", dir.display());
                }
                dir.clone()
            }
            None => candidate_userdata_dirs()
                .into_iter()
                .find(|dir| dir.is_dir())
                .ok_or_else(|| AppError::HostUnavailable {
                    reason: "no Kodi userdata directory found; set host.userdata_dir".to_string(),
                })?,
        };

        log::info!("Kodi userdata directory: {}", dir.display());
        let paths = HostPaths::new(dir);
        Ok(self.paths.get_or_init(|| paths).clone())
    }

    async fn watched_movies(&self) -> Result<Vec<WatchedItem>> {
        let mut properties = MOVIE_IDENTITY.to_vec();
        properties.extend(["playcount", "lastplayed"]);
        let result = self
            .rpc(
                "VideoLibrary.GetMovies",
                json!({
                    "properties": properties,
                    "filter": { "field": "playcount", "operator": "greaterthan", "value": "0" },
                }),
            )
            .await?;
        Ok(parse_watched_movies(&result))
    }

    async fn watched_episodes(&self) -> Result<Vec<WatchedItem>> {
        let shows = self.show_identities().await?;
        let result = self
            .rpc(
                "VideoLibrary.GetEpisodes",
                json!({
                    "properties": ["showtitle", "season", "episode", "tvshowid", "playcount", "lastplayed"],
                    "filter": { "field": "playcount", "operator": "greaterthan", "value": "0" },
                }),
            )
            .await?;
        Ok(parse_watched_episodes(&shows, &result))
    }

    async fn resume_points(&self) -> Result<Vec<ResumePoint>> {
        let in_progress = json!({ "field": "inprogress", "operator": "true", "value": "" });

        let mut movie_props = MOVIE_IDENTITY.to_vec();
        movie_props.extend(["file", "resume"]);
        let movies = self
            .rpc(
                "VideoLibrary.GetMovies",
                json!({ "properties": movie_props, "filter": in_progress }),
            )
            .await?;

        let shows = self.show_identities().await?;
        let episodes = self
            .rpc(
                "VideoLibrary.GetEpisodes",
                json!({
                    "properties": ["showtitle", "season", "episode", "tvshowid", "file", "resume"],
                    "filter": in_progress,
                }),
            )
            .await?;

        let mut points = parse_movie_resume(&movies);
        points.extend(parse_episode_resume(&shows, &episodes));
        Ok(points)
    }

    async fn set_playcount(&self, item: &WatchedItem) -> Result<()> {
        let library_id = self.library_id(item.kind, &item.id).await?;
        let mut details = json!({ "playcount": item.play_count });
        if let Some(last_played) = &item.last_played {
            details["lastplayed"] = json!(last_played);
        }
        self.set_details(item.kind, library_id, details).await
    }

    async fn set_resume(&self, point: &ResumePoint) -> Result<()> {
        let library_id = match &point.content_id {
            Some(id) => self.library_id(point.kind, id).await?,
            None => self
                .find_by_file(point.kind, &point.file_path)
                .await?
                .ok_or_else(|| AppError::HostItemNotFound {
                    kind: point.kind.to_string(),
                    identifier: point.file_path.clone(),
                })?,
        };
        let details = json!({
            "resume": { "position": point.position_seconds, "total": point.total_seconds },
        });
        self.set_details(point.kind, library_id, details).await
    }

    async fn favorites(&self) -> Result<Vec<FavoriteEntry>> {
        let result = self
            .rpc(
                "Favourites.GetFavourites",
                json!({ "properties": ["path", "thumbnail", "window", "windowparameter"] }),
            )
            .await?;
        Ok(parse_favourites_result(&result))
    }

    async fn add_favorite(&self, entry: &FavoriteEntry) -> Result<()> {
        let mut params = match &entry.action {
            ActionDescriptor::Media { path } => {
                json!({ "title": entry.title, "type": "media", "path": path })
            }
            ActionDescriptor::WindowActivation { window, parameter } => {
                let mut params = json!({ "title": entry.title, "type": "window", "window": window });
                if let Some(parameter) = parameter {
                    params["windowparameter"] = json!(parameter);
                }
                params
            }
            ActionDescriptor::Other { .. } => {
                let incoming = std::slice::from_ref(entry);
                self.rewrite_favourites(|entries| add_missing(entries, incoming) > 0)
                    .await?;
                return Ok(());
            }
        };
        if let Some(thumbnail) = &entry.thumbnail {
            params["thumbnail"] = json!(thumbnail);
        }
        self.rpc("Favourites.AddFavourite", params).await?;
        Ok(())
    }

    async fn remove_favorite(&self, title: &str) -> Result<bool> {
        self.rewrite_favourites(|entries| remove_by_title(entries, title))
            .await
    }

    async fn refresh_favorites(&self) -> Result<()> {
        let window = self
            .rpc("GUI.GetProperties", json!({ "properties": ["currentwindow"] }))
            .await?;
        if window.pointer("/currentwindow/id").and_then(Value::as_i64) == Some(FAVOURITES_WINDOW_ID) {
            self.rpc("GUI.ActivateWindow", json!({ "window": "favouritesbrowser" }))
                .await?;
        }
        self.rpc(
            "GUI.ShowNotification",
            json!({ "title": "CloudSync", "message": "Favorites synced" }),
        )
        .await?;
        Ok(())
    }
}

/// Userdata locations of a default Kodi install, most common first
pub fn candidate_userdata_dirs() -> Vec<PathBuf> {
    let Some(base) = BaseDirs::new() else {
        return Vec::new();
    };
    vec![
        base.home_dir().join(".kodi").join("userdata"),
        base.home_dir()
            .join(".var/app/tv.kodi.Kodi/data/userdata"),
        base.data_dir().join("Kodi").join("userdata"),
    ]
}

fn host_error(err: NetworkError) -> AppError {
    match err {
        NetworkError::Http(e) if e.is_connect() => AppError::HostUnavailable {
            reason: e.to_string(),
        },
        NetworkError::Status { status: 401, .. } => AppError::HostUnavailable {
            reason: "JSON-RPC credentials rejected".to_string(),
        },
        NetworkError::Resilience(e) if e.is_local_guard() => AppError::HostUnavailable {
            reason: e.to_string(),
        },
        other => other.into(),
    }
}

fn rpc_result(method: &str, mut body: Value) -> NetworkResult<Value> {
    if let Some(error) = body.get("error") {
        return Err(NetworkError::Rpc {
            method: method.to_string(),
            code: error["code"].as_i64().unwrap_or(0),
            message: error["message"].as_str().unwrap_or("unknown error").to_string(),
        });
    }
    match body.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(NetworkError::UnexpectedResponse {
            method: method.to_string(),
            reason: "no result".to_string(),
        }),
    }
}

/// Items of a list result; a missing or null list is empty
fn items<'a>(result: &'a Value, list: &str) -> impl Iterator<Item = &'a Value> {
    result
        .get(list)
        .and_then(Value::as_array)
        .map(|a| a.iter())
        .into_iter()
        .flatten()
}

fn unique_ids(item: &Value) -> BTreeMap<String, String> {
    item["uniqueid"]
        .as_object()
        .map(|ids| {
            ids.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn text<'a>(item: &'a Value, key: &str) -> &'a str {
    item[key].as_str().unwrap_or("")
}

fn last_played(item: &Value) -> Option<String> {
    Some(text(item, "lastplayed").trim().to_string()).filter(|s| !s.is_empty())
}

fn movie_identity(movie: &Value) -> Option<ContentId> {
    let year = movie["year"].as_u64().map(|y| y as u32);
    ContentId::for_movie(
        movie["imdbnumber"].as_str(),
        &unique_ids(movie),
        text(movie, "title"),
        year,
    )
}

fn episode_identity(shows: &HashMap<i64, ContentId>, episode: &Value) -> Option<ContentId> {
    let show = shows.get(&episode["tvshowid"].as_i64()?)?;
    let season = episode["season"].as_u64()? as u32;
    let number = episode["episode"].as_u64()? as u32;
    Some(ContentId::for_episode(show, season, number))
}

fn episode_title(episode: &Value) -> String {
    format!(
        "{} S{:02}E{:02}",
        text(episode, "showtitle"),
        episode["season"].as_u64().unwrap_or(0),
        episode["episode"].as_u64().unwrap_or(0)
    )
}

fn parse_show_identities(result: &Value) -> HashMap<i64, ContentId> {
    items(result, "tvshows")
        .filter_map(|show| {
            let identity = ContentId::for_show(&unique_ids(show), text(show, "title"))?;
            Some((show["tvshowid"].as_i64()?, identity))
        })
        .collect()
}

fn parse_watched_movies(result: &Value) -> Vec<WatchedItem> {
    items(result, "movies")
        .filter_map(|movie| {
            let id = movie_identity(movie)?;
            let play_count = movie["playcount"].as_u64().unwrap_or(0) as u32;
            let mut item = WatchedItem::new(id, MediaKind::Movie, text(movie, "title"), play_count);
            if let Some(lp) = last_played(movie) {
                item = item.with_last_played(lp);
            }
            Some(item)
        })
        .filter(WatchedItem::is_watched)
        .collect()
}

fn parse_watched_episodes(shows: &HashMap<i64, ContentId>, result: &Value) -> Vec<WatchedItem> {
    items(result, "episodes")
        .filter_map(|episode| {
            let id = episode_identity(shows, episode)?;
            let play_count = episode["playcount"].as_u64().unwrap_or(0) as u32;
            let mut item = WatchedItem::new(id, MediaKind::Episode, episode_title(episode), play_count);
            if let Some(lp) = last_played(episode) {
                item = item.with_last_played(lp);
            }
            Some(item)
        })
        .filter(WatchedItem::is_watched)
        .collect()
}

fn resume_point(item: &Value, kind: MediaKind, id: Option<ContentId>, title: String) -> Option<ResumePoint> {
    let file = text(item, "file");
    if file.is_empty() {
        return None;
    }
    let position = item.pointer("/resume/position").and_then(Value::as_f64).unwrap_or(0.0);
    let total = item.pointer("/resume/total").and_then(Value::as_f64).unwrap_or(0.0);
    let mut point = ResumePoint::new(file, kind, position, total).with_title(title);
    if let Some(id) = id {
        point = point.with_content_id(id);
    }
    Some(point).filter(ResumePoint::is_meaningful)
}

fn parse_movie_resume(result: &Value) -> Vec<ResumePoint> {
    items(result, "movies")
        .filter_map(|movie| {
            resume_point(
                movie,
                MediaKind::Movie,
                movie_identity(movie),
                text(movie, "title").to_string(),
            )
        })
        .collect()
}

fn parse_episode_resume(shows: &HashMap<i64, ContentId>, result: &Value) -> Vec<ResumePoint> {
    items(result, "episodes")
        .filter_map(|episode| {
            resume_point(
                episode,
                MediaKind::Episode,
                episode_identity(shows, episode),
                episode_title(episode),
            )
        })
        .collect()
}

fn parse_favourites_result(result: &Value) -> Vec<FavoriteEntry> {
    items(result, "favourites")
        .filter_map(|fav| {
            let title = text(fav, "title");
            if title.is_empty() {
                return None;
            }
            let path = text(fav, "path");
            let action = match text(fav, "type") {
                "media" if !path.is_empty() => ActionDescriptor::Media {
                    path: path.to_string(),
                },
                "window" => ActionDescriptor::WindowActivation {
                    window: text(fav, "window").to_string(),
                    parameter: Some(text(fav, "windowparameter").to_string())
                        .filter(|p| !p.is_empty()),
                },
                "script" if !path.is_empty() => ActionDescriptor::Other {
                    command: format!("RunScript({})", path),
                },
                _ if !path.is_empty() => ActionDescriptor::parse(path),
                _ => return None,
            };
            let mut entry = FavoriteEntry::new(title, action);
            if let Some(thumb) = fav["thumbnail"].as_str() {
                entry = entry.with_thumbnail(thumb);
            }
            Some(entry)
        })
        .collect()
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| AppError::io_at(dir, e))?;
    temp.write_all(bytes).map_err(|e| AppError::io_at(path, e))?;
    temp.persist(path).map_err(|e| AppError::io_at(path, e.error))?;
    Ok(())
}
