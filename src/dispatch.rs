//! The syscall registry and dispatch kernel (§4.2).
//!
//! [`Registry::build`] collects every handler declared across the active
//! [`crate::layer::Layer`] stack into one table keyed by signature text;
//! on collision the layer closer to the top of the stack wins, and the
//! loser is kept as its delegate (§3 "Syscall registry"). [`Registry`]
//! itself does not run the read/decode/execute/encode/write loop — that
//! lives in [`crate::session::Session::run`] — it only answers "who
//! handles this signature, and what do they say".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{ConfigError, SessionError};
use crate::layer::{Delegate, HandlerCtx, Layer};
use crate::wire::{Signature, Value};

pub struct Registry<R, W> {
    chains: HashMap<String, Vec<Arc<dyn Layer<R, W>>>>,
    implemented_names: HashSet<String>,
}

impl<R, W> Registry<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Builds the registry from `layers`, ordered topmost-first (§4.3: the
    /// VFS/interpreter/stdio layers sit above the defaults layer, which
    /// terminates every chain with an `ENOSYS`-shaped stub).
    pub fn build(layers: Vec<Arc<dyn Layer<R, W>>>) -> Result<Self, ConfigError> {
        let mut chains: HashMap<String, Vec<Arc<dyn Layer<R, W>>>> = HashMap::new();
        for layer in &layers {
            let mut seen_in_layer = HashSet::new();
            for sig in layer.provides() {
                let text = sig.text();
                if !seen_in_layer.insert(text.clone()) {
                    return Err(ConfigError::DuplicateSignature(text));
                }
                chains.entry(text).or_default().push(layer.clone());
            }
        }
        let implemented_names = chains
            .keys()
            .filter_map(|text| Signature::parse(text))
            .map(|sig| sig.name)
            .collect();
        Ok(Registry { chains, implemented_names })
    }

    /// Whether some signature named `name` (any arity/tags) is registered.
    /// Used by the dump check (§4.2, §6), which lists bare function names.
    pub fn implements_name(&self, name: &str) -> bool {
        self.implemented_names.contains(name)
    }

    /// Whether `sig` (exact text) has an effective handler.
    pub fn implements(&self, sig: &Signature) -> bool {
        self.chains.contains_key(&sig.text())
    }

    /// Runs the effective (topmost) handler for `sig`, or `None` if no
    /// layer registered it at all — the caller applies the "missing
    /// signature" policy in that case (§4.2).
    pub async fn dispatch(
        &self,
        sig: &Signature,
        args: Vec<Value>,
        ctx: &mut HandlerCtx<'_, R, W>,
    ) -> Option<Result<Value, SessionError>> {
        let chain = self.chains.get(&sig.text())?;
        let top = chain.first()?.clone();
        let delegate = Delegate::new(chain, 1);
        Some(top.call(sig, args, ctx, delegate).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::defaults::DefaultsLayer;
    use crate::wire::Tag;

    #[test]
    fn exactly_one_effective_handler_per_signature() {
        let layers: Vec<Arc<dyn Layer<tokio::io::DuplexStream, tokio::io::DuplexStream>>> =
            vec![Arc::new(DefaultsLayer::default())];
        let registry = Registry::build(layers).unwrap();
        let sig = Signature::parse("getpid()i").unwrap();
        assert!(registry.implements(&sig));
        assert_eq!(sig.ret, Tag::Int);
    }

    #[test]
    fn duplicate_signature_within_one_layer_is_a_config_error() {
        struct Dup;
        #[async_trait::async_trait]
        impl Layer<tokio::io::DuplexStream, tokio::io::DuplexStream> for Dup {
            fn provides(&self) -> Vec<Signature> {
                vec![Signature::parse("getpid()i").unwrap(), Signature::parse("getpid()i").unwrap()]
            }
            async fn call(
                &self,
                sig: &Signature,
                _args: Vec<Value>,
                _ctx: &mut HandlerCtx<'_, tokio::io::DuplexStream, tokio::io::DuplexStream>,
                _next: Delegate<'_, tokio::io::DuplexStream, tokio::io::DuplexStream>,
            ) -> Result<Value, SessionError> {
                Ok(crate::wire::failure_sentinel(sig.ret))
            }
        }
        let layers: Vec<Arc<dyn Layer<tokio::io::DuplexStream, tokio::io::DuplexStream>>> =
            vec![Arc::new(Dup)];
        assert!(Registry::build(layers).is_err());
    }
}
