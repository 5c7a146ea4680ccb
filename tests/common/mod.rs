//! Scripted fake providers shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use genroute::{
  ErrorKind, GenerationRequest, GenerationResponse, Orchestrator
, OrchestratorConfig, Provider, ProviderError, ProviderId, ProviderRegistry
, TaskKind, TextStream
};

/// What a fake does on one `generate` call
#[derive(Debug, Clone, Copy)]
pub enum Step
{   Succeed
  , Fail(ErrorKind)
  , /// Fail once the delay has elapsed
    FailAfter(ErrorKind, Duration)
  , Hang
}

/// Shared record of every provider call, in call order
pub type CallLog = Arc<Mutex<Vec<ProviderId>>>;

pub struct FakeProvider
{   id: ProviderId
  , script: Mutex<VecDeque<Step>>
  , fallback_step: Step
  , calls: AtomicUsize
  , probe_alive: AtomicBool
  , probe_hangs: AtomicBool
  , probe_panics: AtomicBool
  , probe_calls: AtomicUsize
  , stream_items: Option<Vec<Result<String, ErrorKind>>>
  , log: Option<CallLog>
}

impl FakeProvider
{   pub fn new(id: ProviderId) -> Self
    {   FakeProvider
        {   id
          , script: Mutex::new(VecDeque::new())
          , fallback_step: Step::Succeed
          , calls: AtomicUsize::new(0)
          , probe_alive: AtomicBool::new(true)
          , probe_hangs: AtomicBool::new(false)
          , probe_panics: AtomicBool::new(false)
          , probe_calls: AtomicUsize::new(0)
          , stream_items: None
          , log: None
        }
    }

    /// Step used once the script is exhausted
    pub fn always(mut self, step: Step) -> Self
    {   self.fallback_step = step;
        self
    }

    /// Steps consumed one per call before falling back to `always`
    pub fn then(self, steps: &[Step]) -> Self
    {   self.script.lock().unwrap().extend(steps.iter().copied());
        self
    }

    pub fn streaming(mut self, items: Vec<Result<&str, ErrorKind>>) -> Self
    {   self.stream_items = Some(
          items.into_iter()
            .map(|item| item.map(str::to_string))
            .collect()
        );
        self
    }

    pub fn logging_to(mut self, log: &CallLog) -> Self
    {   self.log = Some(Arc::clone(log));
        self
    }

    pub fn set_probe_alive(&self, alive: bool)
    {   self.probe_alive.store(alive, Ordering::SeqCst);
    }

    /// Probe never answers; only the caller's timeout ends it
    pub fn set_probe_hangs(&self, hangs: bool)
    {   self.probe_hangs.store(hangs, Ordering::SeqCst);
    }

    pub fn set_probe_panics(&self, panics: bool)
    {   self.probe_panics.store(panics, Ordering::SeqCst);
    }

    pub fn push_steps(&self, steps: &[Step])
    {   self.script.lock().unwrap().extend(steps.iter().copied());
    }

    pub fn calls(&self) -> usize
    {   self.calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize
    {   self.probe_calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step
    {   self.script.lock().unwrap()
          .pop_front()
          .unwrap_or(self.fallback_step)
    }
}

#[async_trait]
impl Provider for FakeProvider
{   fn id(&self) -> ProviderId
    {   self.id
    }

    fn model(&self) -> &str
    {   "fake-model"
    }

    async fn generate(
      &self
    , request: &GenerationRequest
    ) -> Result<GenerationResponse, ProviderError>
    {   self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log
        {   log.lock().unwrap().push(self.id);
        }
        match self.next_step()
        {   Step::Succeed => Ok(GenerationResponse
            {   text: format!("{} says: {}", self.id, request.prompt())
              , provider: self.id
              , model: "fake-model".to_string()
              , tokens_used: Some(7)
              , latency_ms: 0
              , fallback: false
            })
          , Step::Fail(kind) => Err(ProviderError::new(
              self.id, kind, "scripted failure"
            ))
          , Step::FailAfter(kind, delay) => {
              tokio::time::sleep(delay).await;
              Err(ProviderError::new(self.id, kind, "scripted slow failure"))
            }
          , Step::Hang => {
              futures::future::pending::<()>().await;
              unreachable!()
            }
        }
    }

    fn supports_streaming(&self) -> bool
    {   self.stream_items.is_some()
    }

    async fn generate_stream(
      &self
    , _request: &GenerationRequest
    ) -> Result<TextStream, ProviderError>
    {   self.calls.fetch_add(1, Ordering::SeqCst);
        if let Step::Fail(kind) = self.next_step()
        {   return Err(ProviderError::new(self.id, kind, "stream refused"));
        }
        let id = self.id;
        let items: Vec<Result<String, ProviderError>> = self.stream_items
          .clone()
          .unwrap_or_default()
          .into_iter()
          .map(|item| item.map_err(|kind| {
            ProviderError::new(id, kind, "stream broke")
          }))
          .collect();
        Ok(stream::iter(items).boxed())
    }

    async fn health_probe(&self) -> bool
    {   self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if self.probe_panics.load(Ordering::SeqCst)
        {   panic!("{} probe blew up", self.id);
        }
        if self.probe_hangs.load(Ordering::SeqCst)
        {   futures::future::pending::<()>().await;
        }
        self.probe_alive.load(Ordering::SeqCst)
    }
}

pub fn init_logging()
{   let _ = env_logger::builder().is_test(true).try_init();
}

pub fn request() -> GenerationRequest
{   GenerationRequest::new(TaskKind::AdCopy, "Sell running shoes")
      .expect("valid request")
}

pub fn request_for(provider: ProviderId) -> GenerationRequest
{   request().with_preferred_provider(provider)
}

pub fn orchestrator(providers: &[Arc<FakeProvider>]) -> Orchestrator
{   orchestrator_with(providers, &OrchestratorConfig::default())
}

pub fn orchestrator_with(
  providers: &[Arc<FakeProvider>]
, config: &OrchestratorConfig
) -> Orchestrator
{   init_logging();
    let providers: Vec<Arc<dyn Provider>> = providers.iter()
      .map(|p| Arc::clone(p) as Arc<dyn Provider>)
      .collect();
    Orchestrator::new(ProviderRegistry::new(providers), config)
}

/// Drive `fake` unhealthy through live traffic, with the other
/// registered fakes absorbing each request
pub async fn demote(orch: &Orchestrator, fake: &FakeProvider)
{   fake.push_steps(&[Step::Fail(ErrorKind::UpstreamFault); 3]);
    for _ in 0..3
    {   orch.generate(&request_for(fake.id())).await
          .expect("another provider serves the request");
    }
}

/// One always-succeeding fake per role
pub fn healthy_trio() -> Vec<Arc<FakeProvider>>
{   ProviderId::ALL.iter()
      .map(|id| Arc::new(FakeProvider::new(*id)))
      .collect()
}
