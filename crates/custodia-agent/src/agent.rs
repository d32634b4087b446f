//! Composition root.
//!
//! [`Agent::new`] builds every protocol service from explicit collaborators
//! and registers their response handlers with one dispatcher.

use std::sync::Arc;

use custodia_core::Config;
use custodia_crypto::{Key, KeyStore};
use tracing::info;

use crate::context::AgentContext;
use crate::error::Result;
use crate::events::EventBus;
use crate::pipeline::InboundPipeline;
use crate::protocols::ServiceContext;
use crate::protocols::cek_exchange::CekExchangeService;
use crate::protocols::distributed_pack::DistributedPackService;
use crate::protocols::distributed_unpack::DistributedUnpackService;
use crate::protocols::pubkey::PubKeyService;
use crate::protocols::signature_exchange::SignatureExchangeService;
use crate::storage::RecordDatabase;
use crate::transport::{Broker, HandlerOutcome, InboundDispatcher, MessageSender};

/// External collaborators an [`Agent`] is built from.
pub struct AgentDependencies {
    pub database: RecordDatabase,
    pub broker: Arc<dyn Broker>,
    pub key_store: Arc<dyn KeyStore>,
    pub pipeline: Arc<dyn InboundPipeline>,
}

/// A device agent whose private key lives with a custodian.
#[derive(Clone)]
pub struct Agent {
    context: AgentContext,
    events: EventBus,
    dispatcher: Arc<InboundDispatcher>,
    pubkey: PubKeyService,
    cek_exchange: CekExchangeService,
    distributed_pack: DistributedPackService,
    distributed_unpack: DistributedUnpackService,
    signature_exchange: SignatureExchangeService,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("context", &self.context)
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl Agent {
    pub fn new(config: &Config, deps: AgentDependencies) -> Result<Self> {
        config.validate()?;

        let context = AgentContext::from_config(config);
        let events = EventBus::default();
        let ctx = ServiceContext {
            agent: context.clone(),
            database: deps.database,
            events: events.clone(),
            sender: MessageSender::new(deps.broker, context.device_id.clone()),
            key_store: deps.key_store,
            completion_timeout: config.custody.completion_timeout(),
        };

        let pubkey = PubKeyService::new(ctx.clone());
        let cek_exchange = CekExchangeService::new(ctx.clone(), pubkey.clone());
        let distributed_pack = DistributedPackService::new(ctx.clone(), pubkey.clone());
        let distributed_unpack =
            DistributedUnpackService::new(ctx.clone(), pubkey.clone(), deps.pipeline);
        let signature_exchange = SignatureExchangeService::new(ctx, pubkey.clone());

        let mut dispatcher = InboundDispatcher::new();
        dispatcher.register(Arc::new(pubkey.clone()));
        dispatcher.register(Arc::new(cek_exchange.clone()));
        dispatcher.register(Arc::new(distributed_pack.clone()));
        dispatcher.register(Arc::new(distributed_unpack.clone()));
        dispatcher.register(Arc::new(signature_exchange.clone()));

        info!(
            device_id = %context.device_id,
            context_id = %context.context_id,
            "Agent initialized"
        );

        Ok(Self {
            context,
            events,
            dispatcher: Arc::new(dispatcher),
            pubkey,
            cek_exchange,
            distributed_pack,
            distributed_unpack,
            signature_exchange,
        })
    }

    /// Open the configured record store and build the agent on it.
    pub async fn open(
        config: &Config,
        broker: Arc<dyn Broker>,
        key_store: Arc<dyn KeyStore>,
        pipeline: Arc<dyn InboundPipeline>,
    ) -> Result<Self> {
        config.validate()?;
        let database = match &config.storage.database_path {
            Some(path) => RecordDatabase::open(path).await?,
            None => RecordDatabase::open_in_memory().await?,
        };
        Self::new(
            config,
            AgentDependencies {
                database,
                broker,
                key_store,
                pipeline,
            },
        )
    }

    pub const fn context(&self) -> &AgentContext {
        &self.context
    }

    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    pub const fn pubkey(&self) -> &PubKeyService {
        &self.pubkey
    }

    pub const fn cek_exchange(&self) -> &CekExchangeService {
        &self.cek_exchange
    }

    pub const fn distributed_pack(&self) -> &DistributedPackService {
        &self.distributed_pack
    }

    pub const fn distributed_unpack(&self) -> &DistributedUnpackService {
        &self.distributed_unpack
    }

    pub const fn signature_exchange(&self) -> &SignatureExchangeService {
        &self.signature_exchange
    }

    /// Topics to subscribe to for custodian responses.
    pub fn inbound_topics(&self) -> Vec<String> {
        custodia_proto::topics::inbound_topics(&self.context.device_id)
    }

    /// Handle one inbound broker payload.
    pub async fn receive(&self, payload: &[u8]) -> Result<HandlerOutcome> {
        self.dispatcher.dispatch(payload).await
    }

    pub async fn get_public_key(&self) -> Result<Key> {
        self.pubkey.get_public_key().await
    }
}
