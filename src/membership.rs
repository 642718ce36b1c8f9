//! Per-community authorization. A user's standing in a community is never
//! persisted as a role of its own; it is recomputed from the community's
//! roster on every request. The account-level [`Role`](crate::models::Role)
//! only decides which roster set a joining user lands in.

use crate::{
    error::AppResult,
    models::{BlogStatus, Community, MemberRole, Role},
    schema::{communities, community_members},
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

/// A user's effective standing within one community.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Admin,
    Teacher,
    Student,
    NonMember,
}

impl Membership {
    pub fn is_member(&self) -> bool {
        !matches!(self, Membership::NonMember)
    }

    /// Whether this member may review a blog authored with the given role
    /// snapshot. The admin reviews anything; a teacher reviews only
    /// student-authored posts, so teacher posts are admin-only.
    pub fn can_review(&self, author_role: Role) -> bool {
        match self {
            Membership::Admin => true,
            Membership::Teacher => author_role == Role::Student,
            _ => false,
        }
    }
}

/// A community's membership lists, loaded fresh for each request.
#[derive(Debug, Clone)]
pub struct Roster {
    pub community: Community,
    pub teachers: Vec<i32>,
    pub students: Vec<i32>,
}

impl Roster {
    pub async fn load(
        conn: &mut AsyncPgConnection,
        community_id: i32,
    ) -> AppResult<Option<Roster>> {
        let Some(community) = communities::table
            .find(community_id)
            .first::<Community>(conn)
            .await
            .optional()? else {
            return Ok(None);
        };

        Ok(Some(Self::for_community(conn, community).await?))
    }

    pub async fn for_community(
        conn: &mut AsyncPgConnection,
        community: Community,
    ) -> AppResult<Roster> {
        let members = community_members::table
            .filter(community_members::community_id.eq(community.id))
            .select((community_members::user_id, community_members::member_role))
            .load::<(i32, MemberRole)>(conn)
            .await?;

        let mut roster = Roster {
            community,
            teachers: Vec::new(),
            students: Vec::new(),
        };
        for (user_id, member_role) in members {
            match member_role {
                MemberRole::Teacher => roster.teachers.push(user_id),
                MemberRole::Student => roster.students.push(user_id),
            }
        }
        Ok(roster)
    }

    pub fn resolve(&self, user_id: i32) -> Membership {
        if self.community.admin_id == user_id {
            Membership::Admin
        } else if self.teachers.contains(&user_id) {
            Membership::Teacher
        } else if self.students.contains(&user_id) {
            Membership::Student
        } else {
            Membership::NonMember
        }
    }
}

/// The roster set an account's global role maps onto when joining. Admin
/// accounts have no slot; join handlers turn that into an explicit error
/// instead of silently adding them nowhere.
pub fn join_target(role: Role) -> Option<MemberRole> {
    match role {
        Role::Teacher => Some(MemberRole::Teacher),
        Role::Student => Some(MemberRole::Student),
        Role::Admin => None,
    }
}

/// Read-side visibility for a single blog. Mirrors the predicates used to
/// build the listing and search queries: the admin sees everything, a
/// teacher additionally sees pending student posts, everyone sees approved
/// posts and their own.
pub fn can_view_blog(
    membership: Membership,
    viewer_id: i32,
    author_id: i32,
    author_role: Role,
    status: BlogStatus,
) -> bool {
    if viewer_id == author_id || status == BlogStatus::Approved {
        return true;
    }
    match membership {
        Membership::Admin => true,
        Membership::Teacher => author_role == Role::Student && status == BlogStatus::Pending,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn roster() -> Roster {
        Roster {
            community: Community {
                id: 1,
                name: "rust study group".to_string(),
                description: "weekly sessions".to_string(),
                join_code: "ABC123".to_string(),
                admin_id: 10,
                created_at: NaiveDateTime::from_timestamp_opt(0, 0).unwrap(),
            },
            teachers: vec![20, 21],
            students: vec![30],
        }
    }

    #[test]
    fn resolves_each_roster_set() {
        let roster = roster();
        assert_eq!(roster.resolve(10), Membership::Admin);
        assert_eq!(roster.resolve(20), Membership::Teacher);
        assert_eq!(roster.resolve(30), Membership::Student);
        assert_eq!(roster.resolve(99), Membership::NonMember);
    }

    #[test]
    fn review_rights_follow_membership_and_author_snapshot() {
        assert!(Membership::Admin.can_review(Role::Teacher));
        assert!(Membership::Admin.can_review(Role::Student));
        assert!(Membership::Teacher.can_review(Role::Student));
        // a teacher's post can only be reviewed by the community admin
        assert!(!Membership::Teacher.can_review(Role::Teacher));
        assert!(!Membership::Student.can_review(Role::Student));
        assert!(!Membership::NonMember.can_review(Role::Student));
    }

    #[test]
    fn admin_accounts_have_no_join_slot() {
        assert_eq!(join_target(Role::Teacher), Some(MemberRole::Teacher));
        assert_eq!(join_target(Role::Student), Some(MemberRole::Student));
        assert_eq!(join_target(Role::Admin), None);
    }

    #[test]
    fn pending_student_post_visible_to_reviewers_only() {
        // student 30 authored a pending post
        let view = |membership, viewer| {
            can_view_blog(membership, viewer, 30, Role::Student, BlogStatus::Pending)
        };
        assert!(view(Membership::Admin, 10));
        assert!(view(Membership::Teacher, 20));
        assert!(view(Membership::Student, 30)); // the author
        assert!(!view(Membership::Student, 31)); // another student
    }

    #[test]
    fn approved_posts_visible_to_everyone() {
        assert!(can_view_blog(
            Membership::Student,
            31,
            30,
            Role::Student,
            BlogStatus::Approved
        ));
    }

    #[test]
    fn pending_teacher_post_hidden_from_other_teachers() {
        assert!(!can_view_blog(
            Membership::Teacher,
            21,
            20,
            Role::Teacher,
            BlogStatus::Pending
        ));
        assert!(can_view_blog(
            Membership::Admin,
            10,
            20,
            Role::Teacher,
            BlogStatus::Pending
        ));
    }
}
