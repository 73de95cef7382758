use std::{
    collections::HashMap,
    fmt::{Debug, Formatter},
    sync::Arc,
};

use rand::{SeedableRng, rngs::StdRng};
use tracing::{debug, error};
use url::Url;

use crate::{
    Error, Result,
    common::pool::BufferPool,
    config::scheme::{DOH_SCHEME, DohOption, HTTP_OBFS_SCHEME, HttpObfsOption},
    proxy::{AnyDialer, doh::DohDialer, http_obfs::HttpObfsDialer},
};

/// Shared state handed to every dialer constructor.
#[derive(Clone, Debug, Default)]
pub struct FactoryContext {
    pub pool: Arc<BufferPool>,
    /// seeds the user agent choice of obfs dialers, random when `None`
    pub seed: Option<u64>,
}

pub type DialerConstructor =
    Box<dyn Fn(&Url, AnyDialer, &FactoryContext) -> Result<AnyDialer> + Send + Sync>;

struct Registration {
    constructor: DialerConstructor,
    usage: String,
}

/// Builds dialers from forwarder urls, keyed by the url scheme.
pub struct DialerFactory {
    schemes: HashMap<String, Registration>,
    ctx: FactoryContext,
}

impl Default for DialerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DialerFactory {
    pub fn new() -> Self {
        Self::with_context(FactoryContext::default())
    }

    pub fn with_context(ctx: FactoryContext) -> Self {
        let mut factory = Self {
            schemes: HashMap::new(),
            ctx,
        };

        factory.register(
            HTTP_OBFS_SCHEME,
            |u, upstream, ctx| {
                let opts = HttpObfsOption::try_from(u)?;
                let pool = ctx.pool.clone();
                let d = match ctx.seed {
                    Some(seed) => HttpObfsDialer::with_rng(
                        opts,
                        upstream,
                        pool,
                        StdRng::seed_from_u64(seed),
                    ),
                    None => HttpObfsDialer::new(opts, upstream, pool),
                };
                Ok(Arc::new(d) as AnyDialer)
            },
            "httpobfs scheme:\n  httpobfs://host:port[/path][?host=xxx]\n",
        );
        factory.register(
            DOH_SCHEME,
            |u, upstream, _| {
                let opts = DohOption::try_from(u)?;
                Ok(Arc::new(DohDialer::new(opts, upstream)?) as AnyDialer)
            },
            "doh scheme:\n  doh://host[:port][/path][?timeout=seconds]\n",
        );

        factory
    }

    /// registers `scheme`, replacing any previous constructor for it
    pub fn register<F>(&mut self, scheme: &str, constructor: F, usage: impl Into<String>)
    where
        F: Fn(&Url, AnyDialer, &FactoryContext) -> Result<AnyDialer>
            + Send
            + Sync
            + 'static,
    {
        self.schemes.insert(
            scheme.to_ascii_lowercase(),
            Registration {
                constructor: Box::new(constructor),
                usage: usage.into(),
            },
        );
    }

    /// builds the dialer described by `s` on top of `upstream`
    pub fn build(&self, s: &str, upstream: AnyDialer) -> Result<AnyDialer> {
        let u = Url::parse(s).inspect_err(|e| {
            error!("parse forwarder {} err: {}", s, e);
        })?;

        let registration = self.schemes.get(u.scheme()).ok_or_else(|| {
            Error::InvalidConfig(format!("unknown scheme: {}", u.scheme()))
        })?;

        let d = (registration.constructor)(&u, upstream, &self.ctx)?;
        debug!("[{}] dialer ready, next hop {}", u.scheme(), d.addr());
        Ok(d)
    }

    /// builds `urls` left to right, each dialer dialing through the previous
    /// one and the first one through `base`
    pub fn build_chain<S: AsRef<str>>(
        &self,
        urls: &[S],
        base: AnyDialer,
    ) -> Result<AnyDialer> {
        urls.iter()
            .try_fold(base, |upstream, u| self.build(u.as_ref(), upstream))
    }

    pub fn schemes(&self) -> Vec<&str> {
        let mut schemes = self.schemes.keys().map(String::as_str).collect::<Vec<_>>();
        schemes.sort_unstable();
        schemes
    }

    pub fn usage(&self) -> String {
        self.schemes()
            .into_iter()
            .filter_map(|s| self.schemes.get(s))
            .map(|r| r.usage.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Debug for DialerFactory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialerFactory")
            .field("schemes", &self.schemes())
            .field("ctx", &self.ctx)
            .finish()
    }
}
