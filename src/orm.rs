#[allow(warnings, clippy::all)]
pub(crate) mod short_link {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "url")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub title: String,
        pub url: String,
        pub redirect_type: String,
        pub redirect_time: i32,
        pub view: Option<i64>,
        pub password: Option<String>,
        pub date: Option<i64>,
        pub ip: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}
