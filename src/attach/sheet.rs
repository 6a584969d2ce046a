// SPDX-License-Identifier: Apache-2.0

//! Spreadsheet attachment strategy: delegates to the sheet driver's own
//! attach and wraps the created views as a catalog result.

use async_trait::async_trait;

use super::{AttachmentStrategy, StrategyContext};
use crate::driver::AttachOptions;
use crate::error::{FederationError, FederationResult};
use crate::provider::ProviderFamily;
use crate::types::AttachmentResult;

pub struct SheetStrategy;

#[async_trait]
impl AttachmentStrategy for SheetStrategy {
    fn name(&self) -> &'static str {
        "sheet"
    }

    fn handles(&self, family: ProviderFamily) -> bool {
        family == ProviderFamily::Sheet
    }

    async fn attach(&self, ctx: &StrategyContext) -> FederationResult<AttachmentResult> {
        // the strategy path creates a conversation-scoped schema; without a
        // conversation there is nothing to scope it to
        if ctx.conversation_id.is_none() {
            return Err(FederationError::missing_context(
                "spreadsheet attach requires a conversation id",
            ));
        }
        let driver = ctx.registry.driver_for(ProviderFamily::Sheet).await?;
        let result = driver
            .attach(AttachOptions {
                config: ctx.datasource.config.clone(),
                database_name: ctx.database_name.clone(),
                engine: ctx.engine.clone(),
            })
            .await?;
        Ok(AttachmentResult::Catalog {
            attached_database_name: ctx.database_name.clone(),
            tables: result.tables,
        })
    }
}
