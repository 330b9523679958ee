//! Audit trail through the LMS.
//!
//! Records are posted as unpublished announcements and read back from the
//! announcement list. Writing never fails the operation being audited.

use chrono::Utc;
use sectionwise_audit::{
    apply_query, read_entries, AuditPage, AuditPost, AuditQuery, AuditRecord, PostRenderer,
};
use sectionwise_lms::{LmsGateway, NewPost, Post, PostQuery};
use tracing::{instrument, warn};

use crate::error::{Result, SectionwiseError};
use crate::session::CourseSession;

fn audit_post(post: Post) -> AuditPost {
    AuditPost {
        id: post.id.0,
        title: post.title,
        message: post.message,
        author_name: post.author_name,
        posted_at: post.posted_at,
    }
}

impl<G: LmsGateway> CourseSession<G> {
    /// Appends an audit record. Failures are logged and swallowed.
    #[instrument(skip(self, record), fields(action = %record.action))]
    pub async fn record(&self, record: AuditRecord) {
        let renderer = PostRenderer::new(&record, Utc::now());
        let post = NewPost {
            title: renderer.title(),
            body: renderer.body(),
            private: true,
        };
        if let Err(e) = self.gateway().create_discussion_post(self.course(), &post).await {
            warn!(error = %e, "Failed to write audit entry");
        }
    }

    /// Reads, filters and paginates the audit log.
    #[instrument(skip(self))]
    pub async fn audit_log(&self, query: &AuditQuery) -> Result<AuditPage> {
        let posts = self
            .gateway()
            .list_discussion_posts(
                self.course(),
                PostQuery {
                    only_announcements: true,
                },
            )
            .await
            .map_err(|e| SectionwiseError::upstream("read audit log", e))?;

        let entries = read_entries(posts.into_iter().map(audit_post));
        Ok(apply_query(entries, query))
    }
}
