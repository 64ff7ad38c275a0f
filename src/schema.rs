// Diesel table definitions.
// Kept in sync by hand with `DbContext::init_schema`.

diesel::table! {
    users (id) {
        id -> Integer,
        email -> Text,
        name -> Text,
        disk_quota -> BigInt,
        max_requests_per_hour -> Integer,
        request_expiration_days -> Nullable<Integer>,
        auto_delete -> Integer,
        created_at -> Text,
    }
}

diesel::table! {
    user_datasets (user_id, dataset_name) {
        user_id -> Integer,
        dataset_name -> Text,
    }
}

diesel::table! {
    access_keys (id) {
        id -> Integer,
        user_id -> Integer,
        token -> Text,
        created_at -> Text,
        expiration -> Nullable<Text>,
        scope -> Nullable<Text>,
    }
}

diesel::table! {
    requests (id) {
        id -> Integer,
        user_id -> Integer,
        name -> Text,
        args -> Text,
        submission_date -> Text,
        end_date -> Nullable<Text>,
        status -> Text,
        task_id -> Text,
        error_message -> Nullable<Text>,
        schedule_id -> Nullable<Integer>,
    }
}

diesel::table! {
    file_outputs (id) {
        id -> Integer,
        filename -> Text,
        size -> BigInt,
        user_id -> Integer,
        request_id -> Integer,
    }
}

diesel::table! {
    schedules (id) {
        id -> Integer,
        user_id -> Integer,
        name -> Text,
        submission_date -> Text,
        args -> Text,
        is_crontab -> Integer,
        period -> Nullable<Text>,
        every -> Nullable<Integer>,
        crontab -> Nullable<Text>,
        on_data_ready -> Integer,
        enabled -> Integer,
        state -> Text,
    }
}

diesel::table! {
    task_queue (task_id) {
        task_id -> Text,
        task_name -> Text,
        queue -> Text,
        routing_key -> Text,
        payload -> Text,
        enqueued_at -> Text,
        claimed_at -> Nullable<Text>,
        claimed_by -> Nullable<Text>,
    }
}

diesel::table! {
    task_results (task_id) {
        task_id -> Text,
        status -> Text,
        error -> Nullable<Text>,
        date_done -> Nullable<Text>,
    }
}

diesel::table! {
    scheduler_entries (key) {
        key -> Text,
        value -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    aggregations (id) {
        id -> Integer,
        dataset -> Text,
        reftime -> Text,
        count -> BigInt,
        created_at -> Text,
    }
}

diesel::joinable!(access_keys -> users (user_id));
diesel::joinable!(requests -> users (user_id));
diesel::joinable!(file_outputs -> requests (request_id));
diesel::joinable!(schedules -> users (user_id));
diesel::joinable!(user_datasets -> users (user_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    user_datasets,
    access_keys,
    requests,
    file_outputs,
    schedules,
);
