//! `all_orm_descriptors` follows class body order, for randomly named bodies.

use std::collections::HashSet;

use rand::Rng;
use rand::seq::SliceRandom;

use ormlens::{
    Class, Column, Declarative, HybridProperty, MapperConfig, MetaData, Registry, Value,
    relationship_to,
};

fn random_name(rng: &mut impl Rng, taken: &HashSet<String>) -> String {
    const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    loop {
        let len = rng.gen_range(5..=15);
        let name: String = (0..len)
            .map(|_| char::from(LETTERS[rng.gen_range(0..LETTERS.len())]))
            .collect();
        if !taken.contains(&name) {
            return name;
        }
    }
}

/// Between 8 and 15 distinct names, none in `taken`.
fn random_names(rng: &mut impl Rng, taken: &mut HashSet<String>) -> Vec<String> {
    let count = rng.gen_range(8..=15);
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let name = random_name(rng, taken);
        taken.insert(name.clone());
        names.push(name);
    }
    names
}

/// Add one body item per name: primary-key and foreign-key columns for a
/// root class, otherwise a random mix of columns, relationships and hybrids.
fn ordered_body(
    rng: &mut impl Rng,
    mut decl: Declarative,
    names: &[String],
    root: bool,
) -> Declarative {
    let (pk_names, fk_name): (HashSet<&String>, Option<&String>) = if root {
        let pk_count = rng.gen_range(1..=3);
        let pk: HashSet<&String> = names.choose_multiple(rng, pk_count).collect();
        let rest: Vec<&String> = names.iter().filter(|n| !pk.contains(n)).collect();
        let fk = rest.choose(rng).copied();
        (pk, fk)
    } else {
        (HashSet::new(), None)
    };

    for name in names {
        decl = if pk_names.contains(name) {
            decl.column(Column::integer(name.as_str()).primary_key(true))
        } else if Some(name) == fk_name {
            decl.column(Column::integer(name.as_str()).references("myotherclass.id"))
        } else {
            match rng.gen_range(0..3) {
                0 => decl.relationship(name.as_str(), relationship_to("MyOtherClass")),
                1 => decl.column(Column::integer(name.as_str())),
                _ => decl.hybrid(HybridProperty::new(name.as_str(), |_| Ok(Value::Null)).unwrap()),
            }
        };
    }
    decl
}

fn registry_with_other_class() -> Registry {
    let registry = Registry::new();
    registry
        .declare(
            Declarative::new("MyOtherClass")
                .table("myotherclass")
                .column(Column::integer("id").primary_key(true)),
        )
        .unwrap();
    registry
}

fn descriptor_keys(class: &Class) -> Vec<String> {
    class
        .class_mapper()
        .unwrap()
        .all_orm_descriptors()
        .keys()
        .into_iter()
        .map(String::from)
        .collect()
}

#[test]
fn declared_body_order_without_inheritance() {
    let mut rng = rand::thread_rng();
    let registry = registry_with_other_class();
    let names = random_names(&mut rng, &mut HashSet::new());
    let decl = ordered_body(
        &mut rng,
        Declarative::new("MyClass").table("mytable"),
        &names,
        true,
    );
    let my_class = registry.declare(decl).unwrap();
    assert_eq!(descriptor_keys(&my_class), names);
}

#[test]
fn declared_body_order_with_one_level_of_inheritance() {
    let mut rng = rand::thread_rng();
    let registry = registry_with_other_class();
    let mut taken = HashSet::new();

    let base_names = random_names(&mut rng, &mut taken);
    let decl = ordered_body(
        &mut rng,
        Declarative::new("MyClass").table("mytable"),
        &base_names,
        true,
    );
    let my_class = registry.declare(decl).unwrap();

    let sub_names = random_names(&mut rng, &mut taken);
    let decl = ordered_body(
        &mut rng,
        Declarative::new("SubClass").subclass_of(&my_class),
        &sub_names,
        false,
    );
    let sub_class = registry.declare(decl).unwrap();

    let expected: Vec<String> = sub_names.iter().chain(&base_names).cloned().collect();
    assert_eq!(descriptor_keys(&sub_class), expected);
}

#[test]
fn imperative_table_column_order() {
    let mut rng = rand::thread_rng();
    let mut taken = HashSet::from(["id".to_string()]);
    let names = random_names(&mut rng, &mut taken);

    let metadata = MetaData::new();
    let mut columns = vec![Column::integer("id").primary_key(true)];
    columns.extend(names.iter().map(|n| Column::integer(n.as_str())));
    let table = metadata.table("t", columns).unwrap();

    let registry = Registry::new();
    let my_class = Class::new("MyClass");
    registry
        .map_imperatively(&my_class, MapperConfig::new().table(&table))
        .unwrap();

    let mut expected = vec!["id".to_string()];
    expected.extend(names);
    assert_eq!(descriptor_keys(&my_class), expected);
}
