pub mod partners {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "partners")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub name: String,
        pub email: String,
        #[sea_orm(unique)]
        pub api_key: String,
        pub api_secret_hash: String,
        pub status: PartnerStatusDb,
        pub pricing_tier: PricingTierDb,
        pub price_per_gb: f64,
        pub balance: f64,
        pub total_usage_gb: f64,
        pub total_spent: f64,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub created_at: DateTimeUtc,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum PartnerStatusDb {
        #[sea_orm(num_value = 0)]
        Active,
        #[sea_orm(num_value = 1)]
        Inactive,
        #[sea_orm(num_value = 2)]
        Suspended,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum PricingTierDb {
        #[sea_orm(num_value = 1)]
        Tier1,
        #[sea_orm(num_value = 2)]
        Tier2,
        #[sea_orm(num_value = 3)]
        Tier3,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod contributor_earnings {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "contributor_earnings")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub contributor_id: String,
        pub today_earned: f64,
        pub today_date: Date,
        pub total_earned: f64,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod relay_sessions {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "relay_sessions")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub contributor_id: String,
        pub bandwidth_limit_gb: f64,
        pub bytes_relayed_mb: f64,
        pub is_active: bool,
        pub started_at: DateTimeUtc,
        pub stopped_at: Option<DateTimeUtc>,
        pub updated_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod usage_records {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "usage_records")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub partner_id: String,
        pub contributor_id: String,
        pub target_url: String,
        pub method: String,
        /// JSON object of forwarded request headers.
        pub headers: String,
        pub body: Option<String>,
        pub response_status: i32,
        pub response_size: i64,
        pub billed_volume_mb: f64,
        pub cost: f64,
        pub contributor_earnings: f64,
        pub recorded_at: DateTimeUtc,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod payouts {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "payouts")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub contributor_id: String,
        pub amount: f64,
        pub credits: f64,
        pub status: PayoutStatusDb,
        pub payment_method: PaymentMethodDb,
        /// JSON object with the method-specific destination.
        pub payment_details: String,
        pub transaction_id: Option<String>,
        pub error_message: Option<String>,
        pub created_at: DateTimeUtc,
        pub processed_at: Option<DateTimeUtc>,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum PayoutStatusDb {
        #[sea_orm(num_value = 0)]
        Pending,
        #[sea_orm(num_value = 1)]
        Processing,
        #[sea_orm(num_value = 2)]
        Completed,
        #[sea_orm(num_value = 3)]
        Failed,
    }

    #[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum)]
    #[sea_orm(rs_type = "i8", db_type = "TinyInteger")]
    pub enum PaymentMethodDb {
        #[sea_orm(num_value = 0)]
        Paypal,
        #[sea_orm(num_value = 1)]
        Crypto,
        #[sea_orm(num_value = 2)]
        Bank,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod contributor_tokens {
    use sea_orm::entity::prelude::*;
    use sea_orm::sea_query::Expr;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "contributor_tokens")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub token_hash: String,
        pub contributor_id: String,
        #[sea_orm(default_expr = "Expr::current_timestamp()")]
        pub issued_at: DateTimeUtc,
        pub revoked_at: Option<DateTimeUtc>,
        pub revoke_reason: Option<String>,
    }

    #[derive(Debug, Clone, Copy, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
