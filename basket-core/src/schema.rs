use diesel::{allow_tables_to_appear_in_same_query, joinable, table};

table! {
    users (id) {
        id -> BigInt,
        external_id -> Uuid,
        email -> Text,
        display_name -> Nullable<Text>,
        imported -> Bool,
        days_between_notifications -> Nullable<Integer>,
        notifications_start_at -> Nullable<Timestamptz>,
        next_scheduled_at -> Nullable<Timestamptz>,
        pending_notification -> Bool,
        last_notification_sent_at -> Nullable<Timestamptz>,
        notify_via_email -> Bool,
        notification_claimed_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    orders (id) {
        id -> BigInt,
        external_id -> Uuid,
        user_id -> BigInt,
        status -> Text,
        total_items -> Integer,
        imported -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    carts (id) {
        id -> BigInt,
        external_id -> Uuid,
        user_id -> BigInt,
        imported -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    order_status_history (id) {
        id -> BigInt,
        order_id -> BigInt,
        old_status -> Nullable<Text>,
        new_status -> Text,
        changed_at -> Timestamptz,
        changed_by -> Nullable<BigInt>,
        note -> Nullable<Text>,
    }
}

joinable!(orders -> users (user_id));
joinable!(carts -> users (user_id));
joinable!(order_status_history -> orders (order_id));

allow_tables_to_appear_in_same_query!(users, orders, carts, order_status_history);
