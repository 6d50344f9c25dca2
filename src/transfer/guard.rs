//! Scoped suspension of referential-integrity checks
//!
//! `acquire` probes the session and disables checks only when they are on.
//! `restore` re-enables exactly what was disabled. A guard dropped without
//! `restore` logs a warning since async cleanup cannot run in `Drop`.

use crate::db::statement::foreign_key_checks_enabled;
use crate::db::{DatabaseAdapter, SessionContext, Statement};
use crate::error::AppResult;
use tracing::{debug, warn};

pub struct ForeignKeyGuard<'a> {
    adapter: &'a dyn DatabaseAdapter,
    ctx: SessionContext,
    disabled: bool,
    released: bool,
}

impl<'a> ForeignKeyGuard<'a> {
    pub async fn acquire(adapter: &'a dyn DatabaseAdapter, ctx: &SessionContext) -> AppResult<ForeignKeyGuard<'a>> {
        let probe = adapter
            .execute_query(ctx, &Statement::ForeignKeyChecksProbe)
            .await?;
        let enabled = foreign_key_checks_enabled(&probe);

        if enabled {
            adapter
                .execute_migration(ctx, &Statement::SetForeignKeyChecks(false))
                .await?;
            debug!("Foreign key checks disabled for '{}'", ctx.schema());
        }

        Ok(Self {
            adapter,
            ctx: ctx.without_deadline(),
            disabled: enabled,
            released: false,
        })
    }

    /// Whether this guard turned checks off
    pub fn disabled_checks(&self) -> bool {
        self.disabled
    }

    /// Undo the change made by `acquire`. Runs without the session deadline.
    pub async fn restore(mut self) -> AppResult<()> {
        self.released = true;
        if self.disabled {
            self.adapter
                .execute_migration(&self.ctx, &Statement::SetForeignKeyChecks(true))
                .await?;
            debug!("Foreign key checks restored for '{}'", self.ctx.schema());
        }
        Ok(())
    }
}

impl Drop for ForeignKeyGuard<'_> {
    fn drop(&mut self) {
        if self.disabled && !self.released {
            warn!(
                "Foreign key checks left disabled on '{}'; guard dropped without restore",
                self.ctx.schema()
            );
        }
    }
}
