//! Shared users / addresses / orders mapping for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use ormlens::{
    Class, Column, Instance, Mapper, MapperConfig, MemoryStorage, Registry, Session, SqlType,
    TableRef, relationship, synonym,
};

pub struct Fixture {
    pub registry: Registry,
    pub users: TableRef,
    pub addresses: TableRef,
    pub orders: TableRef,
    pub user: Class,
    pub address: Class,
    pub order: Class,
    pub storage: Arc<MemoryStorage>,
}

impl Fixture {
    pub fn user_mapper(&self) -> Arc<Mapper> {
        self.user.class_mapper().unwrap()
    }

    pub fn address_mapper(&self) -> Arc<Mapper> {
        self.address.class_mapper().unwrap()
    }

    pub fn session(&self) -> Session {
        Session::new(self.storage.clone())
    }

    /// A transient user with `name` set.
    pub fn new_user(&self, name: &str) -> Instance {
        let u = Instance::new(&self.user);
        u.set("name", name).unwrap();
        u
    }

    pub fn new_address(&self, email: &str) -> Instance {
        let a = Instance::new(&self.address);
        a.set("email_address", email).unwrap();
        a
    }
}

/// `User` maps `addresses` and `orders` relationships ahead of its columns,
/// then gains a `name_syn` synonym after configuration.
pub fn fixture() -> Fixture {
    let registry = Registry::new();
    let metadata = registry.metadata();
    let users = metadata
        .table(
            "users",
            vec![
                Column::integer("id").primary_key(true),
                Column::new("name", SqlType::VarChar(30)),
            ],
        )
        .unwrap();
    let addresses = metadata
        .table(
            "addresses",
            vec![
                Column::integer("id").primary_key(true),
                Column::integer("user_id").references("users.id").nullable(true),
                Column::new("email_address", SqlType::VarChar(50)),
            ],
        )
        .unwrap();
    let orders = metadata
        .table(
            "orders",
            vec![
                Column::integer("id").primary_key(true),
                Column::integer("user_id").references("users.id").nullable(true),
                Column::integer("address_id").references("addresses.id").nullable(true),
                Column::new("description", SqlType::VarChar(30)).nullable(true),
                Column::new("isopen", SqlType::Integer).nullable(true),
            ],
        )
        .unwrap();

    let user = Class::new("User");
    let address = Class::new("Address");
    let order = Class::new("Order");

    registry
        .map_imperatively(
            &user,
            MapperConfig::new()
                .table(&users)
                .property("addresses", relationship(&address).back_populates("user"))
                .property("orders", relationship(&order)),
        )
        .unwrap();
    registry
        .map_imperatively(
            &address,
            MapperConfig::new()
                .table(&addresses)
                .property("user", relationship(&user).back_populates("addresses")),
        )
        .unwrap();
    registry
        .map_imperatively(&order, MapperConfig::new().table(&orders))
        .unwrap();
    user.class_mapper()
        .unwrap()
        .add_property("name_syn", synonym("name"))
        .unwrap();

    Fixture {
        registry,
        users,
        addresses,
        orders,
        user,
        address,
        order,
        storage: Arc::new(MemoryStorage::new()),
    }
}
