use log::{debug, info, warn};
use url::Url;
use crate::config::EngineConfig;
use crate::profile::{Profile, Query};
use crate::profile_cache::{CacheError, ProfileCache};
use crate::profile_parser::{Extraction, ProfileParser};
use crate::session_client::{ClientSetupError, FetchError, HttpTransport, SessionClient, Transport};

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Client(#[from] ClientSetupError),
    #[error("invalid base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissReason {
    SearchFailed,
    NoResults,
    DetailFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Detail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Found { profile: Profile, from_cache: bool },
    NotFound(MissReason),
    RetryExhausted { stage: Stage, attempts: u32 },
}

impl Lookup {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            Lookup::Found { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn into_profile(self) -> Option<Profile> {
        match self {
            Lookup::Found { profile, .. } => Some(profile),
            _ => None,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Lookup::Found { from_cache: true, .. } => "cached",
            Lookup::Found { from_cache: false, .. } => "found",
            Lookup::NotFound(_) => "not_found",
            Lookup::RetryExhausted { .. } => "timed_out",
        }
    }
}

/// Cache-first person lookup: search, follow the first hit, parse, memoize.
pub struct Resolver<T = HttpTransport> {
    client: SessionClient<T>,
    parser: ProfileParser,
    cache: ProfileCache,
    base_url: Url,
}

impl Resolver<HttpTransport> {
    pub fn from_config(config: &EngineConfig) -> Result<Self, SetupError> {
        let client = SessionClient::from_config(config)?;
        let cache = ProfileCache::load(&config.cache_path, config.flush_interval());
        Resolver::new(client, cache, config)
    }
}

impl<T: Transport> Resolver<T> {
    pub fn new(client: SessionClient<T>, cache: ProfileCache, config: &EngineConfig) -> Result<Self, SetupError> {
        Ok(Resolver {
            client,
            parser: ProfileParser::new(),
            cache,
            base_url: Url::parse(&config.base_url)?,
        })
    }

    pub fn client(&self) -> &SessionClient<T> {
        &self.client
    }

    pub fn cache(&self) -> &ProfileCache {
        &self.cache
    }

    /// Only a failed cache write is an error; every remote problem is a `Lookup` variant.
    pub fn lookup(&mut self, query: &Query) -> Result<Lookup, CacheError> {
        let key = query.cache_key();
        if let Some(profile) = self.cache.get(&key) {
            debug!("Cache hit for {}", key);
            return Ok(Lookup::Found { profile: profile.clone(), from_cache: true });
        }

        let profile = match self.resolve(query) {
            Ok(profile) => profile,
            Err(miss) => return Ok(miss),
        };

        info!("Resolved {} via {}", key, profile.source_url);
        self.cache.put(key, profile.clone());
        self.cache.flush()?;
        Ok(Lookup::Found { profile, from_cache: false })
    }

    /// Writes pending profiles regardless of the debounce window. A cache
    /// with nothing new is left untouched on disk.
    pub fn finish(&mut self) -> Result<(), CacheError> {
        if !self.cache.has_pending() {
            debug!("No unsaved profiles, cache file left as is");
            return Ok(());
        }
        self.cache.force_flush()
    }

    fn resolve(&self, query: &Query) -> Result<Profile, Lookup> {
        let body = self.client.search(query).map_err(|e| fetch_miss(e, Stage::Search))?;

        let href = match self.parser.first_search_hit(&body) {
            Extraction::Found(href) => href,
            Extraction::Absent => {
                info!("No search results for {}", query.cache_key());
                return Err(Lookup::NotFound(MissReason::NoResults));
            }
            Extraction::Malformed(reason) => {
                warn!("Unexpected search response for {}: {}", query.cache_key(), reason);
                return Err(Lookup::NotFound(MissReason::NoResults));
            }
        };

        let url = self.base_url.join(&href).map_err(|e| {
            warn!("Bad detail link {:?}: {}", href, e);
            Lookup::NotFound(MissReason::NoResults)
        })?;

        let html = self.client.fetch_detail(url.as_str()).map_err(|e| fetch_miss(e, Stage::Detail))?;
        Ok(self.parser.extract(&html).into_profile(url.as_str()))
    }
}

fn fetch_miss(err: FetchError, stage: Stage) -> Lookup {
    match err {
        FetchError::RetryExhausted { attempts } => Lookup::RetryExhausted { stage, attempts },
        other => {
            warn!("{:?} request failed: {}", stage, other);
            Lookup::NotFound(match stage {
                Stage::Search => MissReason::SearchFailed,
                Stage::Detail => MissReason::DetailFailed,
            })
        }
    }
}
