// ABOUTME: Safety preconditions checked before a clone touches the target
// ABOUTME: Profile validation, source/target identity check and verified read-only mode

use anyhow::{bail, Context, Result};

use crate::engine::SourceDatabase;
use crate::profile::{ConnectionProfile, Role};
use crate::utils::validate_source_target_different;

/// Guards the source database against mutation.
pub struct ReadOnlyGuard;

impl ReadOnlyGuard {
    /// Check both profiles before any connection is opened.
    pub fn check_profiles(source: &ConnectionProfile, target: &ConnectionProfile) -> Result<()> {
        if source.role != Role::Source {
            bail!("Profile {} is not marked as a source", source);
        }
        source.validate()?;
        target.validate()?;
        validate_source_target_different(source, target)
    }

    /// Put the source session in read-only mode. The engine reports success
    /// only after the server confirms the mode, so an error here means no
    /// further source or target operation may run.
    pub async fn enforce(source: &mut dyn SourceDatabase) -> Result<()> {
        source
            .enforce_read_only()
            .await
            .context("Could not enforce READ-ONLY mode on source database; clone aborted")
    }
}
