//! The blog moderation lifecycle: pending -> approved | rejected, with
//! rejected posts resubmittable and content edits forcing a fresh review.
//! Transitions are explicit functions invoked by the specific mutating
//! operations, not a blanket on-save hook, so metadata-only edits (tags,
//! attribution) never touch the status.

use crate::models::{BlogStatus, Role};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("only pending blogs can be reviewed")]
    NotPending,
    #[error("only rejected blogs can be resubmitted")]
    NotRejected,
    #[error("a review comment is required when rejecting")]
    CommentRequired,
    #[error("invalid status value")]
    InvalidVerdict,
}

/// Admin-authored posts skip the review queue entirely.
pub fn initial_status(author_role: Role) -> BlogStatus {
    match author_role {
        Role::Admin => BlogStatus::Approved,
        _ => BlogStatus::Pending,
    }
}

/// Validates a reviewer's verdict against the current status. The verdict
/// must itself be approved or rejected, and only a pending post can be
/// reviewed; rejecting without feedback for the author is refused.
pub fn review(
    current: BlogStatus,
    verdict: BlogStatus,
    comment: Option<&str>,
) -> Result<BlogStatus, TransitionError> {
    if !matches!(verdict, BlogStatus::Approved | BlogStatus::Rejected) {
        return Err(TransitionError::InvalidVerdict);
    }
    if current != BlogStatus::Pending {
        return Err(TransitionError::NotPending);
    }
    if verdict == BlogStatus::Rejected && comment.map_or(true, |c| c.trim().is_empty()) {
        return Err(TransitionError::CommentRequired);
    }
    Ok(verdict)
}

/// Reviewer feedback is stored trimmed; a blank comment is no comment.
pub fn normalize_comment(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

pub fn resubmit(current: BlogStatus) -> Result<BlogStatus, TransitionError> {
    if current != BlogStatus::Rejected {
        return Err(TransitionError::NotRejected);
    }
    Ok(BlogStatus::Pending)
}

/// Outcome of an author edit. When the title or content of an already
/// reviewed post changes, the post re-enters the review queue and the
/// previous verdict is discarded.
#[derive(Debug, PartialEq, Eq)]
pub struct EditOutcome {
    pub status: BlogStatus,
    pub clear_review: bool,
}

pub fn after_edit(current: BlogStatus, title_changed: bool, content_changed: bool) -> EditOutcome {
    let reviewed = matches!(current, BlogStatus::Approved | BlogStatus::Rejected);
    if reviewed && (title_changed || content_changed) {
        EditOutcome {
            status: BlogStatus::Pending,
            clear_review: true,
        }
    } else {
        EditOutcome {
            status: current,
            clear_review: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_posts_start_approved_everyone_else_pending() {
        assert_eq!(initial_status(Role::Admin), BlogStatus::Approved);
        assert_eq!(initial_status(Role::Teacher), BlogStatus::Pending);
        assert_eq!(initial_status(Role::Student), BlogStatus::Pending);
    }

    #[test]
    fn review_only_applies_to_pending_posts() {
        assert_eq!(
            review(BlogStatus::Pending, BlogStatus::Approved, None),
            Ok(BlogStatus::Approved)
        );
        assert_eq!(
            review(BlogStatus::Approved, BlogStatus::Rejected, Some("redo")),
            Err(TransitionError::NotPending)
        );
        assert_eq!(
            review(BlogStatus::Rejected, BlogStatus::Approved, None),
            Err(TransitionError::NotPending)
        );
    }

    #[test]
    fn rejection_requires_feedback() {
        assert_eq!(
            review(BlogStatus::Pending, BlogStatus::Rejected, None),
            Err(TransitionError::CommentRequired)
        );
        assert_eq!(
            review(BlogStatus::Pending, BlogStatus::Rejected, Some("  ")),
            Err(TransitionError::CommentRequired)
        );
        assert_eq!(
            review(
                BlogStatus::Pending,
                BlogStatus::Rejected,
                Some("needs sources")
            ),
            Ok(BlogStatus::Rejected)
        );
    }

    #[test]
    fn blank_comments_normalize_to_none() {
        assert_eq!(normalize_comment(None), None);
        assert_eq!(normalize_comment(Some("")), None);
        assert_eq!(normalize_comment(Some("   ")), None);
        assert_eq!(
            normalize_comment(Some("  needs sources ")),
            Some("needs sources".to_string())
        );
    }

    #[test]
    fn pending_is_not_a_valid_verdict() {
        assert_eq!(
            review(BlogStatus::Pending, BlogStatus::Pending, None),
            Err(TransitionError::InvalidVerdict)
        );
    }

    #[test]
    fn resubmit_only_from_rejected() {
        assert_eq!(resubmit(BlogStatus::Rejected), Ok(BlogStatus::Pending));
        assert_eq!(
            resubmit(BlogStatus::Pending),
            Err(TransitionError::NotRejected)
        );
        assert_eq!(
            resubmit(BlogStatus::Approved),
            Err(TransitionError::NotRejected)
        );
    }

    #[test]
    fn content_edits_reset_reviewed_posts() {
        for current in [BlogStatus::Approved, BlogStatus::Rejected] {
            let outcome = after_edit(current, false, true);
            assert_eq!(outcome.status, BlogStatus::Pending);
            assert!(outcome.clear_review);

            let outcome = after_edit(current, true, false);
            assert_eq!(outcome.status, BlogStatus::Pending);
            assert!(outcome.clear_review);
        }
    }

    #[test]
    fn metadata_only_edits_keep_the_verdict() {
        let outcome = after_edit(BlogStatus::Approved, false, false);
        assert_eq!(outcome.status, BlogStatus::Approved);
        assert!(!outcome.clear_review);
    }

    #[test]
    fn edits_to_pending_posts_stay_pending() {
        let outcome = after_edit(BlogStatus::Pending, true, true);
        assert_eq!(outcome.status, BlogStatus::Pending);
        assert!(!outcome.clear_review);
    }
}
