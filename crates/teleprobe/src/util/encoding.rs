use crate::prelude::*;
use serde::Serialize;
use std::any::type_name;

pub(crate) fn to_json_string_pretty(data: &(impl Serialize + ?Sized)) -> String {
    serialize(data, serde_json::to_string_pretty)
}

fn serialize<T, E>(data: &T, imp: fn(&T) -> Result<String, E>) -> String
where
    T: Serialize + ?Sized,
    E: std::error::Error,
{
    imp(data).unwrap_or_else(|err| {
        let data_type = type_name::<T>();
        panic!(
            "Can't serialize data of type {data_type}: {}",
            err.display_chain()
        )
    })
}
