//! Inspection of classes, attributes, aliases and descriptors.

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ormlens::{
    AssociationProxy, Class, ClassAttribute, Column, Entity, ExtensionType, HybridMethod,
    HybridProperty, Instance, MapperConfig, MetaData, Selectable, Table, Value, aliased,
    column_property, inspect, inspect_opt, relationship,
};

use common::fixture;

#[test]
fn class_inspects_to_its_mapper() {
    let f = fixture();
    let insp = inspect(&f.user).unwrap();
    assert!(insp.is_mapper());
    assert!(Arc::ptr_eq(insp.as_mapper().unwrap(), &f.user_mapper()));

    let again = inspect(&f.user_mapper()).unwrap();
    assert!(Arc::ptr_eq(again.as_mapper().unwrap(), &f.user_mapper()));
}

#[test]
fn column_collection_iterates_in_table_order() {
    let f = fixture();
    let mapper = f.user_mapper();
    let columns = mapper.columns();
    assert_eq!(columns.keys(), ["id", "name"]);
    let listed: Vec<_> = columns.values().cloned().collect();
    assert!(Arc::ptr_eq(&listed[0], &f.users.c("id").unwrap()));
    assert!(Arc::ptr_eq(&listed[1], &f.users.c("name").unwrap()));
    assert!(Arc::ptr_eq(columns.get("id").unwrap(), &f.users.c("id").unwrap()));
}

#[test]
fn primary_key_and_tables() {
    let f = fixture();
    let mapper = f.user_mapper();
    let pk = mapper.primary_key();
    assert_eq!(pk.len(), 1);
    assert!(Arc::ptr_eq(&pk[0], &f.users.c("id").unwrap()));
    assert!(Arc::ptr_eq(mapper.local_table(), &f.users));
    assert!(mapper.persist_selectable().is_table(&f.users));
}

#[test]
fn mapper_selectable_is_its_table() {
    let f = fixture();
    let insp = inspect(&f.user).unwrap();
    let mapper = insp.as_mapper().unwrap();
    assert!(mapper.selectable().is_table(&f.users));
    assert!(!mapper.is_selectable());
    assert!(!mapper.is_aliased_class());
    assert!(!insp.is_selectable());
    assert!(!insp.is_aliased_class());
}

#[test]
fn polymorphic_selectable_is_built_once() {
    let f = fixture();
    let foo = Class::new("Foo");
    let bar = Class::subclass("Bar", &foo);
    f.registry
        .map_imperatively(
            &foo,
            MapperConfig::new()
                .table(&f.users)
                .with_polymorphic(&[bar.clone()]),
        )
        .unwrap();
    f.registry
        .map_imperatively(
            &bar,
            MapperConfig::new()
                .table(&f.addresses)
                .inherits(&foo)
                .property("address_id", f.addresses.c("id").unwrap()),
        )
        .unwrap();

    let first = inspect(&foo).unwrap().as_mapper().unwrap().selectable();
    let second = inspect(&foo).unwrap().as_mapper().unwrap().selectable();
    assert!(first.ptr_eq(&second));
    assert!(matches!(first, Selectable::Join(_)));
    let mapper = foo.class_mapper().unwrap();
    assert_eq!(mapper.with_polymorphic_mappers().len(), 1);
}

#[test]
fn aliased_class_inspects_to_its_alias() {
    let f = fixture();
    let alias = aliased(&f.address).unwrap();
    let insp = inspect(&alias).unwrap();
    let aliased_insp = insp.as_aliased().unwrap();
    assert!(Arc::ptr_eq(aliased_insp, alias.insp()));
    assert!(Arc::ptr_eq(aliased_insp.mapper(), &f.address_mapper()));
    assert!(aliased_insp.selectable().ptr_eq(alias.insp().selectable()));
    assert!(!aliased_insp.selectable().is_table(&f.addresses));
    assert!(!insp.is_selectable());
    assert!(insp.is_aliased_class());
    assert!(aliased_insp.is_aliased_class());
    assert!(aliased_insp.class().ptr_eq(&f.address));
    assert!(aliased_insp.entity().ptr_eq(&alias));
}

#[test]
fn unmapped_subjects_have_no_inspection() {
    struct Foo;
    let err = inspect(&Foo).unwrap_err();
    assert!(err.is_no_inspection());
    assert!(
        err.to_string()
            .starts_with("No inspection system is available for object of type")
    );

    let unmapped = Class::new("Foo");
    let err = inspect(&unmapped).unwrap_err();
    assert!(
        err.to_string()
            .starts_with("No inspection system is available for object of type")
    );

    let instance = Instance::new(&unmapped);
    assert!(inspect(&instance).unwrap_err().is_no_inspection());
    assert!(inspect_opt(&instance).is_none());
}

#[test]
fn attrs_expose_the_mapper_property() {
    let f = fixture();
    let mapper = f.user_mapper();
    assert_eq!(
        mapper.attrs().get("id").unwrap(),
        &mapper.get_property("id").unwrap()
    );
    assert!(mapper.with_polymorphic_mappers().is_empty());
}

#[test]
fn column_property_accessors() {
    let f = fixture();
    let mapper = f.user_mapper();
    let id_prop = mapper.attrs().get("id").unwrap().clone();
    let column = id_prop.as_column().unwrap();
    assert_eq!(column.columns().len(), 1);
    assert!(Arc::ptr_eq(&column.columns()[0], &f.users.c("id").unwrap()));
    assert!(Arc::ptr_eq(column.expression(), &f.users.c("id").unwrap()));
    assert!(id_prop.target_mapper().is_none());
}

#[test]
fn attribute_keys_follow_configuration_order() {
    let f = fixture();
    let mapper = inspect(&f.user).unwrap().mapper().unwrap();
    assert_eq!(
        mapper.attrs().keys(),
        ["addresses", "orders", "id", "name", "name_syn"]
    );
}

#[test]
fn filtered_property_views() {
    let f = fixture();
    let mapper = f.user_mapper();

    let column_attrs = mapper.column_attrs();
    assert_eq!(column_attrs.keys(), ["id", "name"]);
    let listed: Vec<_> = column_attrs.values().cloned().collect();
    assert!(Arc::ptr_eq(
        &listed[0],
        mapper.get_property("id").unwrap().as_column().unwrap()
    ));
    let user_id = f.user.attr("id").unwrap();
    assert!(Arc::ptr_eq(
        column_attrs.get("id").unwrap(),
        user_id.property().as_column().unwrap()
    ));

    let synonyms = mapper.synonyms();
    assert_eq!(synonyms.keys(), ["name_syn"]);
    let name_syn = f.user.attr("name_syn").unwrap();
    assert!(Arc::ptr_eq(
        synonyms.get("name_syn").unwrap(),
        name_syn.property().as_synonym().unwrap()
    ));
    assert_eq!(synonyms.get("name_syn").unwrap().name(), "name");

    let relationships = mapper.relationships();
    let keys: HashSet<&str> = relationships.keys().into_iter().collect();
    assert_eq!(keys, HashSet::from(["orders", "addresses"]));
    let addresses = f.user.attr("addresses").unwrap();
    assert!(Arc::ptr_eq(
        relationships.get("addresses").unwrap(),
        addresses.property().as_relationship().unwrap()
    ));
}

#[test]
fn relationship_attribute_inspection() {
    let f = fixture();
    let attr = f.user.attr("addresses").unwrap();
    let insp = inspect(&attr).unwrap();
    assert!(Arc::ptr_eq(insp.as_attribute().unwrap(), &attr));
    assert!(Arc::ptr_eq(&f.user.attr("addresses").unwrap(), &attr));

    match attr.parent().unwrap() {
        Entity::Mapper(m) => assert!(Arc::ptr_eq(&m, &f.user_mapper())),
        Entity::Aliased(_) => panic!("expected a mapper parent"),
    }
    assert!(Arc::ptr_eq(&attr.parent_mapper().unwrap(), &f.user_mapper()));
    let target = attr.mapper().unwrap().unwrap();
    assert!(Arc::ptr_eq(&target, &f.address_mapper()));
}

#[test]
fn aliased_relationship_attribute_inspection() {
    let f = fixture();
    let ua = aliased(&f.user).unwrap();
    let attr = ua.attr("addresses").unwrap();
    let insp = inspect(&attr).unwrap();
    assert!(Arc::ptr_eq(insp.as_attribute().unwrap(), &attr));
    assert!(Arc::ptr_eq(&ua.attr("addresses").unwrap(), &attr));

    let property = attr.property();
    assert!(Arc::ptr_eq(&property.parent().unwrap(), &f.user_mapper()));
    let target = property.target_mapper().unwrap().unwrap();
    assert!(Arc::ptr_eq(&target, &f.address_mapper()));

    let parent = attr.parent().unwrap();
    assert!(parent.aliased_class().unwrap().ptr_eq(&ua));
    assert!(parent.class().ptr_eq(&f.user));
    assert!(Arc::ptr_eq(&attr.parent_mapper().unwrap(), &f.user_mapper()));
    assert!(Arc::ptr_eq(
        &attr.mapper().unwrap().unwrap(),
        &f.address_mapper()
    ));

    let alias_insp = inspect(&ua).unwrap();
    assert!(parent.ptr_eq(&Entity::Aliased(Arc::clone(alias_insp.as_aliased().unwrap()))));
}

#[test]
fn column_attribute_inspection() {
    let f = fixture();
    let attr = f.user.attr("name").unwrap();
    let insp = inspect(&attr).unwrap();
    assert!(Arc::ptr_eq(insp.as_attribute().unwrap(), &attr));
    assert!(attr.parent().unwrap().ptr_eq(&Entity::Mapper(f.user_mapper())));
    assert!(attr.mapper().unwrap().is_none());
    let expression = attr.expression().unwrap();
    assert!(Arc::ptr_eq(
        expression.as_column().unwrap(),
        &f.users.c("name").unwrap()
    ));
}

#[test]
fn aliased_column_attribute_inspection() {
    let f = fixture();
    let ua = aliased(&f.user).unwrap();
    let attr = ua.attr("name").unwrap();
    assert!(Arc::ptr_eq(inspect(&attr).unwrap().as_attribute().unwrap(), &attr));

    let property = attr.property();
    assert!(Arc::ptr_eq(&property.parent().unwrap(), &f.user_mapper()));
    assert!(property.target_mapper().is_none());

    let parent = attr.parent().unwrap();
    assert!(parent.aliased_class().unwrap().ptr_eq(&ua));
    assert!(parent.class().ptr_eq(&f.user));
    assert!(Arc::ptr_eq(&attr.parent_mapper().unwrap(), &f.user_mapper()));
    assert!(attr.mapper().unwrap().is_none());

    // The expression is the alias's proxy of users.name.
    let expression = attr.expression().unwrap();
    let column = expression.as_column().unwrap();
    assert!(!Arc::ptr_eq(column, &f.users.c("name").unwrap()));
    assert!(column.shares_lineage(&f.users.c("name").unwrap()));
}

#[test]
fn relationship_accessors() {
    let f = fixture();
    let attr = f.user.attr("addresses").unwrap();
    let property = attr.property();
    assert!(Arc::ptr_eq(&property.parent().unwrap(), &f.user_mapper()));
    assert!(Arc::ptr_eq(
        &property.target_mapper().unwrap().unwrap(),
        &f.address_mapper()
    ));
    assert!(property.as_column().is_none());
    assert!(attr.expression().is_ok());

    let insp = inspect(property).unwrap();
    assert!(insp.is_property());
    assert!(Arc::ptr_eq(&insp.mapper().unwrap(), &f.user_mapper()));
}

#[test]
fn extension_types_of_descriptors() {
    let f = fixture();
    let some_class = Class::subclass("SomeClass", &f.user);
    let some_assoc = AssociationProxy::new("some_assoc", "addresses", "email_address").unwrap();
    let upper_name = HybridProperty::new("upper_name", |_| Ok(Value::Null)).unwrap();
    let conv = HybridMethod::new("conv", |_, _| Ok(Value::Null)).unwrap();
    some_class
        .set_attribute("some_assoc", ClassAttribute::AssociationProxy(some_assoc.clone()))
        .unwrap();
    some_class
        .set_attribute("upper_name", ClassAttribute::Hybrid(upper_name.clone()))
        .unwrap();
    some_class
        .set_attribute("conv", ClassAttribute::HybridMethod(conv))
        .unwrap();

    let address = Class::subclass("Address", &f.address);

    let sub_class = Class::subclass("SomeSubClass", &some_class);
    let sub_upper = HybridProperty::new("upper_name", |_| Ok(Value::Null)).unwrap();
    let foo = HybridProperty::new("foo", |_| Ok(Value::Null)).unwrap();
    sub_class
        .set_attribute("upper_name", ClassAttribute::Hybrid(sub_upper.clone()))
        .unwrap();
    sub_class
        .set_attribute("foo", ClassAttribute::Hybrid(foo))
        .unwrap();

    let metadata = MetaData::new();
    let t = metadata
        .table("sometable", vec![Column::integer("id").primary_key(true)])
        .unwrap();
    let ta = metadata
        .table(
            "address_t",
            vec![
                Column::integer("id").primary_key(true),
                Column::integer("s_id").references("sometable.id"),
            ],
        )
        .unwrap();
    f.registry
        .map_imperatively(
            &some_class,
            MapperConfig::new()
                .table(&t)
                .property("addresses", relationship(&address)),
        )
        .unwrap();
    f.registry
        .map_imperatively(&address, MapperConfig::new().table(&ta))
        .unwrap();
    f.registry
        .map_imperatively(&sub_class, MapperConfig::new().inherits(&some_class))
        .unwrap();

    let mapper = inspect(&sub_class).unwrap().mapper().unwrap();
    let descriptors = mapper.all_orm_descriptors();
    let kinds: HashMap<&str, ExtensionType> = descriptors
        .iter()
        .map(|(k, d)| (k, d.extension_type()))
        .collect();
    let expected = HashMap::from([
        ("id", ExtensionType::NotExtension),
        ("name", ExtensionType::NotExtension),
        ("name_syn", ExtensionType::NotExtension),
        ("addresses", ExtensionType::NotExtension),
        ("orders", ExtensionType::NotExtension),
        ("upper_name", ExtensionType::HybridProperty),
        ("foo", ExtensionType::HybridProperty),
        ("conv", ExtensionType::HybridMethod),
        ("some_assoc", ExtensionType::AssociationProxy),
    ]);
    assert_eq!(kinds, expected);

    assert!(Arc::ptr_eq(
        descriptors.get("upper_name").unwrap().as_hybrid().unwrap(),
        &sub_upper
    ));
    assert!(Arc::ptr_eq(
        descriptors.get("some_assoc").unwrap().as_association_proxy().unwrap(),
        &some_assoc
    ));
    let parent_descriptors = some_class.class_mapper().unwrap().all_orm_descriptors();
    assert!(Arc::ptr_eq(
        parent_descriptors.get("upper_name").unwrap().as_hybrid().unwrap(),
        &upper_name
    ));

    let insp = inspect(&upper_name).unwrap();
    assert_eq!(insp.as_descriptor().unwrap().extension_type(), ExtensionType::HybridProperty);
    let insp = inspect(descriptors.get("id").unwrap()).unwrap();
    assert!(insp.is_attribute());
}

#[test]
fn properties_added_after_configure() {
    struct Thing;

    let f = fixture();
    let anon = Class::new("AnonClass");
    anon.set_attribute("__foo__", ClassAttribute::Value(serde_json::json!("bar")))
        .unwrap();
    anon.set_attribute("__bat__", ClassAttribute::Object(Arc::new(Thing)))
        .unwrap();
    let mapper = f
        .registry
        .map_imperatively(&anon, MapperConfig::new().table(&f.users))
        .unwrap();

    fn keys(v: Vec<&str>) -> HashSet<String> {
        v.into_iter().map(String::from).collect()
    }
    fn expect(v: &[&str]) -> HashSet<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    let insp = inspect(&anon).unwrap().mapper().unwrap();
    assert_eq!(keys(insp.attrs().keys()), expect(&["id", "name"]));
    assert_eq!(keys(insp.all_orm_descriptors().keys()), expect(&["id", "name"]));

    mapper
        .add_property("q", column_property([f.users.c("name").unwrap()]))
        .unwrap();
    let foob = HybridProperty::new("foob", |s| s.attribute_value("name")).unwrap();
    anon.set_attribute("foob", ClassAttribute::Hybrid(foob)).unwrap();

    assert_eq!(keys(insp.attrs().keys()), expect(&["id", "name", "q"]));
    assert_eq!(
        keys(insp.all_orm_descriptors().keys()),
        expect(&["id", "name", "q", "foob"])
    );
}

#[test]
fn table_and_alias_inspect_as_selectables() {
    let f = fixture();
    let insp = inspect(&f.users).unwrap();
    assert!(insp.is_selectable());
    assert!(insp.as_selectable().unwrap().is_table(&f.users));
    assert!(insp.mapper().is_none());

    let plain = Table::new("plain", vec![Column::integer("id").primary_key(true)]);
    let insp = inspect(&Selectable::Table(plain.clone())).unwrap();
    assert!(insp.as_selectable().unwrap().is_table(&plain));
}
