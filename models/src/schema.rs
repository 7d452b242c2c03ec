table! {
    api_keys (id) {
        id -> Int4,
        uid -> Int4,
        hashed_key -> Text,
        last_letters -> Text,
        created_at -> Timestamptz,
    }
}

table! {
    payments (id) {
        id -> Int4,
        uid -> Int4,
        payment_request -> Text,
        payment_hash -> Text,
        preimage -> Nullable<Text>,
        status -> Text,
        direction -> Text,
        amount_msat -> Int8,
        fee_msat -> Int8,
        memo -> Nullable<Text>,
        description -> Nullable<Text>,
        callback_url -> Nullable<Text>,
        expiry_secs -> Int8,
        settled_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
        settle_index -> Nullable<Int8>,
    }
}

table! {
    transactions (id) {
        id -> Int4,
        uid -> Int4,
        address -> Text,
        txid -> Nullable<Text>,
        vout -> Nullable<Int4>,
        direction -> Text,
        amount_sat -> Nullable<Int8>,
        description -> Nullable<Text>,
        confirmed_at_block -> Nullable<Int8>,
        confirmed_at -> Nullable<Timestamptz>,
        settled_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    users (uid) {
        uid -> Int4,
        email -> Text,
        hashed_password -> Text,
        first_name -> Nullable<Text>,
        last_name -> Nullable<Text>,
        balance_msat -> Int8,
        totp_secret -> Nullable<Text>,
        confirmed_totp_secret -> Bool,
        has_verified_email -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

joinable!(api_keys -> users (uid));
joinable!(payments -> users (uid));
joinable!(transactions -> users (uid));

allow_tables_to_appear_in_same_query!(api_keys, payments, transactions, users,);
