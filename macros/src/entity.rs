use convert_case::{Case, Casing};
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::meta::ParseNestedMeta;
use syn::{DeriveInput, Ident, LitStr};

#[derive(Default)]
struct EntityAttrs {
    name: Option<LitStr>,
    table: Option<LitStr>,
    key: Option<LitStr>,
    key_type: Option<Ident>,
    timestamps: Option<Timestamps>,
    deleted_at: Option<LitStr>,
    remembers_batch_state: bool,
    connection: Option<LitStr>,
    events: Vec<(Ident, LitStr)>,
}

#[derive(Default)]
struct Timestamps {
    created_at: Option<LitStr>,
    updated_at: Option<LitStr>,
}

pub fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let attrs = parse_attrs(&input)?;
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let type_name = ident.to_string().to_case(Case::Snake);
    let name = attrs
        .name
        .unwrap_or_else(|| LitStr::new(&type_name, Span::call_site()));
    let table = attrs
        .table
        .unwrap_or_else(|| LitStr::new(&pluralize(&type_name), Span::call_site()));

    let mut builder = vec![];

    if attrs.key.is_some() || attrs.key_type.is_some() {
        let key = attrs
            .key
            .unwrap_or_else(|| LitStr::new("id", Span::call_site()));
        let key_type = attrs
            .key_type
            .unwrap_or_else(|| Ident::new("Integer", Span::call_site()));
        builder.push(quote! {
            .key(#key, ::bagua_batch::entity::KeyType::#key_type)
        });
    }

    if let Some(timestamps) = attrs.timestamps {
        match (timestamps.created_at, timestamps.updated_at) {
            (None, None) => builder.push(quote! { .with_timestamps() }),
            (created_at, updated_at) => {
                let created_at =
                    created_at.unwrap_or_else(|| LitStr::new("created_at", Span::call_site()));
                let updated_at =
                    updated_at.unwrap_or_else(|| LitStr::new("updated_at", Span::call_site()));
                builder.push(quote! { .timestamp_columns(#created_at, #updated_at) });
            }
        }
    }

    if let Some(column) = attrs.deleted_at {
        builder.push(quote! { .soft_delete_column(#column) });
    }

    if attrs.remembers_batch_state {
        builder.push(quote! { .remembers_batch_state() });
    }

    if let Some(connection) = attrs.connection {
        builder.push(quote! { .on_connection(#connection) });
    }

    for (kind, event) in attrs.events {
        builder.push(quote! {
            .custom_event(::bagua_batch::event::EventKind::#kind, #event)
        });
    }

    Ok(quote! {
        impl #impl_generics ::bagua_batch::entity::Entity for #ident #ty_generics #where_clause {
            fn entity_type() -> ::bagua_batch::entity::EntityType {
                ::bagua_batch::entity::EntityType::new(#name, #table)
                    #(#builder)*
            }
        }
    })
}

fn parse_attrs(input: &DeriveInput) -> syn::Result<EntityAttrs> {
    let mut attrs = EntityAttrs::default();

    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                attrs.name = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("table") {
                attrs.table = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("key") {
                attrs.key = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("key_type") {
                let lit: LitStr = meta.value()?.parse()?;
                attrs.key_type = Some(key_type(&lit)?);
            } else if meta.path.is_ident("timestamps") {
                let mut timestamps = Timestamps::default();
                if meta.input.peek(syn::token::Paren) {
                    meta.parse_nested_meta(|inner| {
                        if inner.path.is_ident("created_at") {
                            timestamps.created_at = Some(inner.value()?.parse()?);
                        } else if inner.path.is_ident("updated_at") {
                            timestamps.updated_at = Some(inner.value()?.parse()?);
                        } else {
                            return Err(inner.error("expected `created_at` or `updated_at`"));
                        }
                        Ok(())
                    })?;
                }
                attrs.timestamps = Some(timestamps);
            } else if meta.path.is_ident("soft_deletes") {
                let column = if meta.input.peek(syn::Token![=]) {
                    meta.value()?.parse()?
                } else {
                    LitStr::new("deleted_at", Span::call_site())
                };
                attrs.deleted_at = Some(column);
            } else if meta.path.is_ident("remembers_batch_state") {
                attrs.remembers_batch_state = true;
            } else if meta.path.is_ident("connection") {
                attrs.connection = Some(meta.value()?.parse()?);
            } else if meta.path.is_ident("events") {
                meta.parse_nested_meta(|inner| {
                    let kind = event_kind(&inner)?;
                    let event: LitStr = inner.value()?.parse()?;
                    if event.value().is_empty() {
                        return Err(syn::Error::new_spanned(event, "event name cannot be empty"));
                    }
                    attrs.events.push((kind, event));
                    Ok(())
                })?;
            } else {
                return Err(meta.error("unsupported entity attribute"));
            }
            Ok(())
        })?;
    }

    Ok(attrs)
}

fn key_type(lit: &LitStr) -> syn::Result<Ident> {
    let variant = match lit.value().as_str() {
        "integer" | "int" => "Integer",
        "text" | "string" => "Text",
        "other" => "Other",
        _ => {
            return Err(syn::Error::new_spanned(
                lit,
                "expected key_type = \"integer\", \"text\" or \"other\"",
            ))
        }
    };
    Ok(Ident::new(variant, lit.span()))
}

fn event_kind(meta: &ParseNestedMeta) -> syn::Result<Ident> {
    let Some(ident) = meta.path.get_ident() else {
        return Err(meta.error("expected an event kind"));
    };

    let variant = match ident.to_string().as_str() {
        "saving" => "Saving",
        "creating" => "Creating",
        "updating" => "Updating",
        "saved" => "Saved",
        "created" => "Created",
        "updated" => "Updated",
        "deleting" => "Deleting",
        "deleted" => "Deleted",
        "force_deleted" => "ForceDeleted",
        _ => return Err(meta.error("unknown event kind")),
    };
    Ok(Ident::new(variant, ident.span()))
}

fn pluralize(name: &str) -> String {
    if let Some(stem) = name.strip_suffix('y') {
        if !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| name.ends_with(s)) {
        return format!("{name}es");
    }
    format!("{name}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plural_table_names() {
        assert_eq!(pluralize("car"), "cars");
        assert_eq!(pluralize("company"), "companies");
        assert_eq!(pluralize("day"), "days");
        assert_eq!(pluralize("address"), "addresses");
        assert_eq!(pluralize("fleet_box"), "fleet_boxes");
    }

    #[test]
    fn rejects_unknown_attributes() {
        let input: DeriveInput = syn::parse_quote! {
            #[entity(tabel = "cars")]
            struct Car;
        };
        let err = expand(input).err().unwrap();
        assert!(err.to_string().contains("unsupported entity attribute"));
    }

    #[test]
    fn rejects_unknown_key_types() {
        let input: DeriveInput = syn::parse_quote! {
            #[entity(key_type = "uuid")]
            struct Car;
        };
        assert!(expand(input).is_err());
    }
}
