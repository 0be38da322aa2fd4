use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, Instrument};

use crate::context::Context;
use crate::Result;

/// What the chain does after a stage returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    /// Stop the chain, leave the source open until the chain unwinds.
    Abort,
    /// Stop the chain and drop the source immediately.
    AbortAndClose,
}

/// One stage of the connection pipeline.
///
/// Returning `Err` is logged and handled like `Outcome::AbortAndClose`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &mut Context) -> Result<Outcome>;
}

/// Ordered stages plus the final stage. Built once, shared by every connection.
pub struct Chain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Chain {
    pub fn new(mut handlers: Vec<Arc<dyn Handler>>, final_handler: Arc<dyn Handler>) -> Chain {
        handlers.push(final_handler);
        Chain { handlers }
    }

    /// Runs the stages from the context's cursor until the list is exhausted
    /// or a stage aborts.
    pub async fn next(&self, ctx: &mut Context) {
        while ctx.next_index < self.handlers.len() {
            let handler = &self.handlers[ctx.next_index];
            match handler.handle(ctx).await {
                Ok(Outcome::Continue) => ctx.next_index += 1,
                Ok(Outcome::Abort) => ctx.abort(),
                Ok(Outcome::AbortAndClose) => ctx.abort_and_close_source(),
                Err(e) => {
                    error!(error = %e, "handler failed");
                    ctx.abort_and_close_source();
                }
            }
        }
    }

    /// Task entry point for one connection. Both streams are closed on every
    /// exit path, whatever the stages did.
    pub async fn serve(self: Arc<Self>, mut ctx: Context) {
        let span = ctx.span().clone();
        async move {
            ctx.next_index = 0;
            self.next(&mut ctx).await;
            ctx.close();
            info!("connection finished");
        }
        .instrument(span)
        .await
    }
}
