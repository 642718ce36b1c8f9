use crate::schema::*;
use chrono::{NaiveDate, NaiveDateTime};
use diesel::{
    deserialize::{self, FromSql, FromSqlRow},
    expression::AsExpression,
    pg::{Pg, PgValue},
    prelude::*,
    serialize::{self, IsNull, Output, ToSql},
    sql_types::Text,
};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Declares an enum stored as lowercase text in Postgres and serialized
/// the same way on the JSON surface.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize,
        )]
        #[diesel(sql_type = Text)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl ToSql<Text, Pg> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Pg>) -> serialize::Result {
                out.write_all(self.as_str().as_bytes())?;
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Pg> for $name {
            fn from_sql(value: PgValue<'_>) -> deserialize::Result<Self> {
                match std::str::from_utf8(value.as_bytes())? {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        concat!("unrecognized ", stringify!($name), " value: {}"),
                        other
                    )
                    .into()),
                }
            }
        }
    };
}

text_enum!(Role {
    Student => "student",
    Teacher => "teacher",
    Admin => "admin",
});

text_enum!(MemberRole {
    Teacher => "teacher",
    Student => "student",
});

text_enum!(BlogStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(RequestStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

text_enum!(FileCategory {
    Image => "image",
    Video => "video",
    Audio => "audio",
    Pdf => "pdf",
    Text => "text",
    Word => "word",
    Excel => "excel",
    Powerpoint => "powerpoint",
    Document => "document",
});

#[derive(Debug, Clone, Queryable, Identifiable)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = communities)]
pub struct Community {
    pub id: i32,
    pub name: String,
    pub description: String,
    pub join_code: String,
    pub admin_id: i32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Community))]
#[diesel(belongs_to(User))]
pub struct CommunityMember {
    pub id: i32,
    pub community_id: i32,
    pub user_id: i32,
    pub member_role: MemberRole,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Community))]
#[diesel(belongs_to(User))]
pub struct JoinRequest {
    pub id: i32,
    pub community_id: i32,
    pub user_id: i32,
    pub status: RequestStatus,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Community))]
pub struct Material {
    pub id: i32,
    pub community_id: i32,
    pub author_id: i32,
    pub author_role: Role,
    pub title: String,
    pub description: String,
    pub file_name: String,
    pub original_file_name: String,
    pub category: FileCategory,
    pub mime_type: String,
    pub tags: Vec<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Community))]
pub struct Blog {
    pub id: i32,
    pub community_id: i32,
    pub author_id: i32,
    pub author_role: Role,
    pub title: String,
    pub content: String,
    pub is_original_content: bool,
    pub real_author_name: Option<String>,
    pub source_url: Option<String>,
    pub status: BlogStatus,
    pub reviewed_by: Option<i32>,
    pub review_comment: Option<String>,
    pub reviewed_at: Option<NaiveDateTime>,
    pub tags: Vec<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(belongs_to(Community))]
pub struct Event {
    pub id: i32,
    pub community_id: i32,
    pub creator_id: i32,
    pub title: String,
    pub description: String,
    pub links: Option<String>,
    pub location: Option<String>,
    pub date: NaiveDate,
    pub time: String,
    pub created_at: NaiveDateTime,
}
