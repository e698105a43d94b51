//! Dispatches every decoded frame to the interceptors registered for its
//! subtype.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{error, info, trace};

use crate::error::InterceptorError;
use crate::frame::{Dot11Frame, FrameSubtype};

pub trait Interceptor: Send + Sync {
    fn name(&self) -> &str;

    /// Subtypes this interceptor wants to see when registered through
    /// [`FrameProcessorBuilder::register`].
    fn subtypes(&self) -> Vec<FrameSubtype>;

    fn intercept(&self, frame: &Dot11Frame) -> Result<(), InterceptorError>;
}

/// Collects registrations during startup. The built [`FrameProcessor`] is
/// immutable.
#[derive(Default)]
pub struct FrameProcessorBuilder {
    interceptors: HashMap<FrameSubtype, Vec<Arc<dyn Interceptor>>>,
}

impl FrameProcessorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `interceptors` to the callbacks for `subtype`, keeping their
    /// order.
    pub fn register_interceptors(
        &mut self,
        subtype: FrameSubtype,
        interceptors: Vec<Arc<dyn Interceptor>>,
    ) -> &mut Self {
        self.interceptors.entry(subtype).or_default().extend(interceptors);
        self
    }

    /// Registers `interceptor` for every subtype it declares.
    pub fn register(&mut self, interceptor: Arc<dyn Interceptor>) -> &mut Self {
        for subtype in interceptor.subtypes() {
            self.register_interceptors(subtype, vec![Arc::clone(&interceptor)]);
        }
        self
    }

    pub fn build(self) -> FrameProcessor {
        for (subtype, interceptors) in &self.interceptors {
            info!("{} interceptors registered for {:?}", interceptors.len(), subtype);
        }
        FrameProcessor {
            interceptors: self.interceptors,
            processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }
}

pub struct FrameProcessor {
    interceptors: HashMap<FrameSubtype, Vec<Arc<dyn Interceptor>>>,
    processed: AtomicU64,
    failures: AtomicU64,
}

impl FrameProcessor {
    /// Runs every interceptor for the frame's subtype in registration order
    /// on the calling thread. A failing or panicking interceptor is logged
    /// and the remaining ones still run.
    pub fn process(&self, frame: &Dot11Frame) {
        self.processed.fetch_add(1, Ordering::Relaxed);

        let subtype = frame.subtype();
        let Some(interceptors) = self.interceptors.get(&subtype) else {
            trace!("No interceptors for {:?}", subtype);
            return;
        };

        for interceptor in interceptors {
            match panic::catch_unwind(AssertUnwindSafe(|| interceptor.intercept(frame))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Interceptor [{}] failed on {:?} frame from [{}]: {}",
                        interceptor.name(),
                        subtype,
                        frame.transmitter(),
                        e
                    );
                }
                Err(panic) => {
                    self.failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        "Interceptor [{}] panicked on {:?} frame from [{}]: {}",
                        interceptor.name(),
                        subtype,
                        frame.transmitter(),
                        panic_message(panic.as_ref())
                    );
                }
            }
        }
    }

    pub fn interceptor_names(&self, subtype: FrameSubtype) -> Vec<String> {
        self.interceptors
            .get(&subtype)
            .map(|list| list.iter().map(|i| i.name().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn processed_frames(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn interceptor_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
