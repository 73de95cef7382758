use std::sync::{Arc, OnceLock};

use rustls::{RootCertStore, crypto::CryptoProvider};

#[cfg(not(any(feature = "ring", feature = "aws-lc-rs")))]
compile_error!("one of the `ring` or `aws-lc-rs` features must be enabled");

static GLOBAL_ROOT_STORE: OnceLock<Arc<RootCertStore>> = OnceLock::new();

pub fn global_root_store() -> Arc<RootCertStore> {
    GLOBAL_ROOT_STORE
        .get_or_init(|| {
            let root_store =
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned().collect();
            Arc::new(root_store)
        })
        .clone()
}

/// aws-lc-rs wins when both backends are compiled in
pub fn crypto_provider() -> Arc<CryptoProvider> {
    #[cfg(feature = "aws-lc-rs")]
    {
        Arc::new(rustls::crypto::aws_lc_rs::default_provider())
    }
    #[cfg(all(feature = "ring", not(feature = "aws-lc-rs")))]
    {
        Arc::new(rustls::crypto::ring::default_provider())
    }
}
