diesel::table! {
    users (id) {
        id -> Int4,
        name -> Varchar,
        email -> Varchar,
        password_hash -> Varchar,
        role -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    communities (id) {
        id -> Int4,
        name -> Varchar,
        description -> Varchar,
        join_code -> Varchar,
        admin_id -> Int4,
        created_at -> Timestamp,
    }
}

diesel::table! {
    community_members (id) {
        id -> Int4,
        community_id -> Int4,
        user_id -> Int4,
        member_role -> Text,
        joined_at -> Timestamp,
    }
}

diesel::table! {
    join_requests (id) {
        id -> Int4,
        community_id -> Int4,
        user_id -> Int4,
        status -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    materials (id) {
        id -> Int4,
        community_id -> Int4,
        author_id -> Int4,
        author_role -> Text,
        title -> Varchar,
        description -> Varchar,
        file_name -> Varchar,
        original_file_name -> Varchar,
        category -> Text,
        mime_type -> Varchar,
        tags -> Array<Text>,
        created_at -> Timestamp,
    }
}

diesel::table! {
    blogs (id) {
        id -> Int4,
        community_id -> Int4,
        author_id -> Int4,
        author_role -> Text,
        title -> Varchar,
        content -> Text,
        is_original_content -> Bool,
        real_author_name -> Nullable<Varchar>,
        source_url -> Nullable<Varchar>,
        status -> Text,
        reviewed_by -> Nullable<Int4>,
        review_comment -> Nullable<Text>,
        reviewed_at -> Nullable<Timestamp>,
        tags -> Array<Text>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    events (id) {
        id -> Int4,
        community_id -> Int4,
        creator_id -> Int4,
        title -> Varchar,
        description -> Varchar,
        links -> Nullable<Varchar>,
        location -> Nullable<Varchar>,
        date -> Date,
        time -> Varchar,
        created_at -> Timestamp,
    }
}

diesel::joinable!(community_members -> communities (community_id));
diesel::joinable!(community_members -> users (user_id));
diesel::joinable!(join_requests -> communities (community_id));
diesel::joinable!(join_requests -> users (user_id));
diesel::joinable!(materials -> communities (community_id));
diesel::joinable!(materials -> users (author_id));
diesel::joinable!(blogs -> communities (community_id));
diesel::joinable!(events -> communities (community_id));
diesel::joinable!(events -> users (creator_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    communities,
    community_members,
    join_requests,
    materials,
    blogs,
    events,
);
