//! Procedural macros for the `projectit` repository library.
//!
//! This crate provides four macros:
//! - `#[derive(Entity)]`: inspects a struct and generates its table metadata, sequence,
//!   validation, timestamping, cascade rules and a default `RowAdapter`.
//! - `#[derive(Projection)]`: turns a plain struct into an independent record projection.
//! - `#[view(entity = ...)]`: turns an accessor trait into a capability view backed by the
//!   fetched row, via a generated `<Trait>Proxy` type.
//! - `#[repository(...)]`: generates a repository module for an entity, including its
//!   declared query methods, which are resolved when the repository is constructed.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{quote, ToTokens};
use syn::{
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
    spanned::Spanned,
    Data, DeriveInput, Fields, Ident, ItemMod, ItemTrait, LitInt, LitStr, Token, TraitItem, Type,
};

use inflections::Inflect;

// --- Helper Functions for Parsing ---

/// Helper to check if a type is an `Option<T>`.
fn is_option(ty: &Type) -> bool {
    get_option_inner(ty).is_some()
}

/// Helper to get the inner type of an `Option<T>`.
fn get_option_inner(ty: &Type) -> Option<&Type> {
    if let Type::Path(type_path) = ty {
        if type_path.qself.is_some() {
            return None;
        }
        if let Some(segment) = type_path.path.segments.last() {
            if segment.ident == "Option" {
                if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                    if let Some(syn::GenericArgument::Type(inner_ty)) = args.args.first() {
                        return Some(inner_ty);
                    }
                }
            }
        }
    }
    None
}

/// Last path segment of `ty` (after unwrapping `Option`), e.g. `NaiveDateTime`.
fn base_type_name(ty: &Type) -> String {
    let ty = get_option_inner(ty).unwrap_or(ty);
    match ty {
        Type::Path(tp) => tp
            .path
            .segments
            .last()
            .map(|s| s.ident.to_string())
            .unwrap_or_default(),
        other => other.to_token_stream().to_string().replace(' ', ""),
    }
}

fn is_scalar(name: &str) -> bool {
    matches!(name, "String" | "i32" | "i64" | "f64" | "bool")
}

fn is_timestamp(name: &str) -> bool {
    matches!(name, "NaiveDateTime" | "Timestamp")
}

/// Basic validation of table and column names to avoid generating invalid SQL identifiers.
fn is_valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

fn named_fields<'a>(
    input: &'a DeriveInput,
    macro_name: &str,
) -> syn::Result<&'a Punctuated<syn::Field, Token![,]>> {
    match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(named) => Ok(&named.named),
            _ => Err(syn::Error::new(
                input.ident.span(),
                format!("#[derive({macro_name})] only supports structs with named fields."),
            )),
        },
        _ => Err(syn::Error::new(
            input.ident.span(),
            format!("#[derive({macro_name})] can only be used on structs."),
        )),
    }
}

/// Holds parsed metadata about a single struct field.
struct FieldMetadata {
    ident: Ident,
    ty: Type,
    base_ty: String,
    column_name: String,
    is_id: bool,
    is_skipped: bool,
    not_blank: bool,
    created_at: bool,
    updated_at: bool,
    one_to_one: bool,
}

impl FieldMetadata {
    /// Stored in this entity's own table.
    fn is_persisted(&self) -> bool {
        !self.is_skipped
    }
}

/// Parses all named fields and their `#[fetch(...)]` attributes.
fn parse_field_metadata(input: &DeriveInput) -> syn::Result<Vec<FieldMetadata>> {
    let fields = named_fields(input, "Entity")?;
    let mut out = Vec::with_capacity(fields.len());
    for field in fields {
        let ident = field
            .ident
            .clone()
            .ok_or_else(|| syn::Error::new(field.span(), "expected a named field"))?;
        let mut meta = FieldMetadata {
            base_ty: base_type_name(&field.ty),
            ty: field.ty.clone(),
            column_name: ident.to_string(),
            ident,
            is_id: false,
            is_skipped: false,
            not_blank: false,
            created_at: false,
            updated_at: false,
            one_to_one: false,
        };
        let mut explicit_column = false;
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("fetch")) {
            attr.parse_nested_meta(|m| {
                if m.path.is_ident("column") {
                    let s: LitStr = m.value()?.parse()?;
                    meta.column_name = s.value();
                    explicit_column = true;
                } else if m.path.is_ident("id") {
                    meta.is_id = true;
                } else if m.path.is_ident("skip") {
                    meta.is_skipped = true;
                } else if m.path.is_ident("not_blank") {
                    meta.not_blank = true;
                } else if m.path.is_ident("created_at") {
                    meta.created_at = true;
                } else if m.path.is_ident("updated_at") {
                    meta.updated_at = true;
                } else if m.path.is_ident("one_to_one") {
                    meta.one_to_one = true;
                } else {
                    return Err(m.error(
                        "unsupported #[fetch] option; expected one of id, column, skip, not_blank, created_at, updated_at, one_to_one",
                    ));
                }
                Ok(())
            })?;
        }
        if meta.one_to_one && !explicit_column {
            meta.column_name = format!("{}_id", meta.ident);
        }
        out.push(meta);
    }
    Ok(out)
}

/// Settings from `#[entity(...)]` on the struct.
struct EntityArgs {
    table: Option<String>,
    sequence: Option<String>,
    initial_value: i64,
    allocation_size: i64,
}

fn parse_entity_args(input: &DeriveInput) -> syn::Result<EntityArgs> {
    let mut args = EntityArgs {
        table: None,
        sequence: None,
        initial_value: 1,
        allocation_size: 1,
    };
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("entity")) {
        attr.parse_nested_meta(|m| {
            if m.path.is_ident("table") {
                args.table = Some(m.value()?.parse::<LitStr>()?.value());
            } else if m.path.is_ident("sequence") {
                args.sequence = Some(m.value()?.parse::<LitStr>()?.value());
            } else if m.path.is_ident("initial_value") {
                args.initial_value = m.value()?.parse::<LitInt>()?.base10_parse()?;
            } else if m.path.is_ident("allocation_size") {
                let lit = m.value()?.parse::<LitInt>()?;
                args.allocation_size = lit.base10_parse()?;
                if args.allocation_size < 1 {
                    return Err(syn::Error::new(lit.span(), "allocation_size must be at least 1"));
                }
            } else {
                return Err(m.error(
                    "unsupported #[entity] option; expected table, sequence, initial_value or allocation_size",
                ));
            }
            Ok(())
        })?;
    }
    Ok(args)
}

// --- `Entity` derive macro ---

#[proc_macro_derive(Entity, attributes(entity, fetch))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_entity(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_entity(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let vis = &input.vis;
    let entity_name = struct_name.to_string();
    let fields_metadata = parse_field_metadata(input)?;
    let args = parse_entity_args(input)?;

    // If no override, deduce it from the struct name (`User` -> `users`).
    let snake = entity_name.to_snake_case();
    let table_name = args.table.unwrap_or_else(|| format!("{snake}s"));
    if !is_valid_ident(&table_name) {
        return Err(syn::Error::new(
            struct_name.span(),
            format!("Invalid table name `{table_name}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`."),
        ));
    }
    for f in fields_metadata.iter().filter(|f| f.is_persisted()) {
        if !is_valid_ident(&f.column_name) {
            return Err(syn::Error::new(
                f.ident.span(),
                format!("Invalid column name `{}`. Use ASCII letters, digits, or `_`, starting with a letter or `_`.", f.column_name),
            ));
        }
    }
    let sequence_name = args.sequence.unwrap_or_else(|| format!("{snake}_sequence"));
    let initial_value = args.initial_value;
    let allocation_size = args.allocation_size;

    // --- Validate field roles ---
    let ids: Vec<_> = fields_metadata.iter().filter(|f| f.is_id).collect();
    let id_field = match ids.as_slice() {
        [one] => *one,
        [] => {
            return Err(syn::Error::new(
                struct_name.span(),
                "A field must be marked with #[fetch(id)]. Hint: mark your primary key field like `#[fetch(id)]`.",
            ))
        }
        [_, extra, ..] => {
            return Err(syn::Error::new(
                extra.ident.span(),
                format!("Exactly one field must be marked with #[fetch(id)] (found {}).", ids.len()),
            ))
        }
    };
    if id_field.base_ty != "i64" {
        return Err(syn::Error::new(
            id_field.ty.span(),
            "#[fetch(id)] must be `i64` (with `-1` meaning unsaved) or `Option<i64>`.",
        ));
    }
    for f in &fields_metadata {
        if f.is_skipped {
            continue;
        }
        if f.one_to_one {
            if !is_option(&f.ty) {
                return Err(syn::Error::new(
                    f.ty.span(),
                    "#[fetch(one_to_one)] fields must be `Option<T>` where `T: Entity`.",
                ));
            }
        } else if !(is_scalar(&f.base_ty) || is_timestamp(&f.base_ty)) {
            return Err(syn::Error::new(
                f.ty.span(),
                format!("Unsupported field type `{}`. Hint: use String/i32/i64/f64/bool/NaiveDateTime (optionally in Option), mark it with #[fetch(one_to_one)], or exclude it with #[fetch(skip)].", f.ty.to_token_stream().to_string().replace(' ', "")),
            ));
        }
        if f.not_blank && f.base_ty != "String" {
            return Err(syn::Error::new(
                f.ty.span(),
                "#[fetch(not_blank)] applies to `String` or `Option<String>` fields.",
            ));
        }
        if (f.created_at || f.updated_at) && !is_timestamp(&f.base_ty) {
            return Err(syn::Error::new(
                f.ty.span(),
                "#[fetch(created_at)] / #[fetch(updated_at)] fields must be `NaiveDateTime` or `Option<NaiveDateTime>`.",
            ));
        }
    }

    // --- Implement `Fetchable` ---
    let select_columns: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.is_persisted())
        .map(|f| &f.column_name)
        .collect();
    let findable_columns: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.is_persisted() && !f.is_id && !f.one_to_one && is_scalar(&f.base_ty))
        .map(|f| {
            let col = &f.column_name;
            let ty_str = &f.base_ty;
            quote! { (#col, #ty_str) }
        })
        .collect();

    let references: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.is_persisted() && f.one_to_one)
        .map(|f| {
            let col = &f.column_name;
            let child_ty = get_option_inner(&f.ty).unwrap_or(&f.ty);
            quote! {
                ::projectit_core::ForeignKey {
                    column: #col,
                    table: <#child_ty as ::projectit_core::Fetchable>::TABLE,
                    key_column: <#child_ty as ::projectit_core::Identifiable>::ID_COLUMN,
                }
            }
        })
        .collect();

    let fetchable_impl = quote! {
        impl ::projectit_core::Fetchable for #struct_name {
            const TABLE: &'static str = #table_name;
            const SELECT_COLUMNS: &'static [&'static str] = &[#(#select_columns),*];
            const FINDABLE_COLUMNS: &'static [(&'static str, &'static str)] = &[#(#findable_columns),*];
            const REFERENCES: &'static [::projectit_core::ForeignKey] = &[#(#references),*];
        }
    };

    // --- Implement `Identifiable` and `Sequenced` ---
    let id_ident = &id_field.ident;
    let id_column_name = &id_field.column_name;
    let (id_accessor, id_assign) = if is_option(&id_field.ty) {
        (
            quote! { self.#id_ident },
            quote! { self.#id_ident = ::core::option::Option::Some(key); },
        )
    } else {
        (
            quote! { (self.#id_ident != ::projectit_core::UNSAVED_ID).then_some(self.#id_ident) },
            quote! { self.#id_ident = key; },
        )
    };

    let identifiable_impl = quote! {
        impl ::projectit_core::Identifiable for #struct_name {
            type Key = i64;
            const ID_COLUMN: &'static str = #id_column_name;
            fn id(&self) -> Option<Self::Key> {
                #id_accessor
            }
            fn assign_id(&mut self, key: Self::Key) {
                #id_assign
            }
        }

        impl ::projectit_core::Sequenced for #struct_name {
            const SEQUENCE: ::projectit_core::SequenceDefinition = ::projectit_core::SequenceDefinition {
                name: #sequence_name,
                initial_value: #initial_value,
                allocation_size: #allocation_size,
            };
        }
    };

    // --- Implement `Insertable` and `Updatable` ---
    let to_param_value = |field: &FieldMetadata| {
        let ident = &field.ident;
        if field.one_to_one {
            quote! {
                ::projectit_core::ParamValue::from(
                    self.#ident.as_ref().and_then(::projectit_core::Identifiable::id)
                )
            }
        } else {
            quote! { ::projectit_core::ParamValue::from(::core::clone::Clone::clone(&self.#ident)) }
        }
    };

    let insert_fields: Vec<_> = fields_metadata
        .iter()
        .filter(|f| !f.is_id && f.is_persisted())
        .collect();
    let insert_columns: Vec<_> = insert_fields.iter().map(|f| &f.column_name).collect();
    let insert_values: Vec<_> = insert_fields.iter().map(|f| to_param_value(f)).collect();

    let insertable_impl = quote! {
        impl ::projectit_core::Insertable for #struct_name {
            const INSERT_COLUMNS: &'static [&'static str] = &[#(#insert_columns),*];
            fn insert_values(&self) -> Vec<::projectit_core::ParamValue> {
                vec![#(#insert_values),*]
            }
        }
    };

    // Creation stamps are written once.
    let update_fields: Vec<_> = insert_fields.iter().filter(|f| !f.created_at).collect();
    let update_columns: Vec<_> = update_fields.iter().map(|f| &f.column_name).collect();
    let update_values: Vec<_> = update_fields.iter().map(|f| to_param_value(f)).collect();

    let updatable_impl = quote! {
        impl ::projectit_core::Updatable for #struct_name {
            const UPDATE_COLUMNS: &'static [&'static str] = &[#(#update_columns),*];
            fn update_values(&self) -> Vec<::projectit_core::ParamValue> {
                vec![#(#update_values),*]
            }
        }
    };

    // --- Implement `Timestamped` ---
    let stamp = |f: &FieldMetadata| {
        let ident = &f.ident;
        if is_option(&f.ty) {
            quote! { self.#ident = ::core::option::Option::Some(at); }
        } else {
            quote! { self.#ident = at; }
        }
    };
    let created_stamps: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.created_at || f.updated_at)
        .map(stamp)
        .collect();
    let updated_stamps: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.updated_at)
        .map(stamp)
        .collect();
    let created_arg = if created_stamps.is_empty() {
        quote! { _at }
    } else {
        quote! { at }
    };
    let updated_arg = if updated_stamps.is_empty() {
        quote! { _at }
    } else {
        quote! { at }
    };

    let timestamped_impl = quote! {
        impl ::projectit_core::Timestamped for #struct_name {
            fn stamp_created(&mut self, #created_arg: ::projectit_core::Timestamp) {
                #(#created_stamps)*
            }
            fn stamp_updated(&mut self, #updated_arg: ::projectit_core::Timestamp) {
                #(#updated_stamps)*
            }
        }
    };

    // --- Implement `Validate` ---
    let blank_checks: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.not_blank)
        .map(|f| {
            let ident = &f.ident;
            let field_name = ident.to_string();
            let err = quote! {
                return Err(::projectit_core::ValidationError { entity: #entity_name, field: #field_name })
            };
            if is_option(&f.ty) {
                quote! {
                    match &self.#ident {
                        ::core::option::Option::Some(v) if ::projectit_core::is_not_blank(v) => {}
                        _ => #err,
                    }
                }
            } else {
                quote! {
                    if !::projectit_core::is_not_blank(&self.#ident) {
                        #err;
                    }
                }
            }
        })
        .collect();
    let owned: Vec<_> = fields_metadata
        .iter()
        .filter(|f| f.one_to_one && !f.is_skipped)
        .collect();
    let graph_checks: Vec<_> = owned
        .iter()
        .map(|f| {
            let ident = &f.ident;
            quote! {
                if let ::core::option::Option::Some(child) = &self.#ident {
                    ::projectit_core::Validate::validate(child)?;
                }
            }
        })
        .collect();

    let validate_impl = quote! {
        impl ::projectit_core::Validate for #struct_name {
            fn validate(&self) -> ::core::result::Result<(), ::projectit_core::ValidationError> {
                #(#blank_checks)*
                #(#graph_checks)*
                Ok(())
            }
        }
    };

    // --- Implement `Cascade` ---
    let cascade_saves: Vec<_> = owned
        .iter()
        .map(|f| {
            let ident = &f.ident;
            quote! {
                if let ::core::option::Option::Some(child) = self.#ident.take() {
                    self.#ident = ::core::option::Option::Some(
                        ::projectit_core::persist::save_entity(session, child).await?,
                    );
                }
            }
        })
        .collect();
    let loads: Vec<_> = owned
        .iter()
        .map(|f| {
            let ident = &f.ident;
            let col = &f.column_name;
            let child_ty = get_option_inner(&f.ty).unwrap_or(&f.ty);
            quote! {
                self.#ident = match row.try_get::<::core::option::Option<i64>>(#col)? {
                    ::core::option::Option::Some(id) => ::core::option::Option::Some(
                        ::projectit_core::persist::load_entity::<#child_ty, S>(session, id)
                            .await?
                            .ok_or(::projectit_core::RepoError::NotFound)?,
                    ),
                    ::core::option::Option::None => ::core::option::Option::None,
                };
            }
        })
        .collect();
    let (session_arg, row_arg) = if owned.is_empty() {
        (quote! { _session }, quote! { _row })
    } else {
        (quote! { session }, quote! { row })
    };

    let cascade_impl = quote! {
        #[::projectit_core::async_trait]
        impl ::projectit_core::Cascade for #struct_name {
            async fn cascade_save<S: ::projectit_core::Session + ?Sized>(
                &mut self,
                #session_arg: &S,
            ) -> ::projectit_core::RepoResult<()> {
                #(#cascade_saves)*
                Ok(())
            }

            async fn load_associations<S: ::projectit_core::Session + ?Sized>(
                &mut self,
                #row_arg: &::projectit_core::Row,
                #session_arg: &S,
            ) -> ::projectit_core::RepoResult<()> {
                #(#loads)*
                Ok(())
            }
        }
    };

    // --- Generate `RowAdapter` ---
    let adapter_struct_name = Ident::new(&format!("{}RowAdapter", struct_name), struct_name.span());

    let get_mappings: Vec<_> = fields_metadata
        .iter()
        .map(|f| {
            let ident = &f.ident;
            if f.is_skipped {
                return quote! { #ident: ::core::default::Default::default() };
            }
            if f.one_to_one {
                // Resolved by `Cascade::load_associations`.
                return quote! { #ident: ::core::option::Option::None };
            }
            let col_name_lit = LitStr::new(&f.column_name, ident.span());
            quote! { #ident: row.try_get(#col_name_lit)? }
        })
        .collect();

    let row_adapter_impl = quote! {
        #[derive(Debug, Clone, Copy, Default)]
        #vis struct #adapter_struct_name;

        impl ::projectit_core::RowAdapter<#struct_name> for #adapter_struct_name {
            type Row = ::projectit_core::Row;
            fn from_row(&self, row: &Self::Row) -> ::projectit_core::RepoResult<#struct_name> {
                Ok(#struct_name {
                    #(#get_mappings),*
                })
            }
        }

        impl ::projectit_core::Entity for #struct_name {
            type Adapter = #adapter_struct_name;
        }
    };

    // --- Combine all generated code ---
    Ok(quote! {
        #fetchable_impl
        #identifiable_impl
        #insertable_impl
        #updatable_impl
        #timestamped_impl
        #validate_impl
        #cascade_impl
        #row_adapter_impl
    })
}

// --- `Projection` derive macro ---

#[proc_macro_derive(Projection, attributes(projection))]
pub fn derive_projection(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand_projection(&input)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_projection(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let mut entity: Option<syn::Path> = None;
    for attr in input.attrs.iter().filter(|a| a.path().is_ident("projection")) {
        attr.parse_nested_meta(|m| {
            if m.path.is_ident("entity") {
                entity = Some(m.value()?.parse()?);
                Ok(())
            } else {
                Err(m.error("unsupported #[projection] option on a struct; expected `entity = Type`"))
            }
        })?;
    }
    let entity = entity.ok_or_else(|| {
        syn::Error::new(
            struct_name.span(),
            "`#[projection(entity = Type)]` is required on #[derive(Projection)] structs",
        )
    })?;

    let mut columns = Vec::new();
    let mut mappings = Vec::new();
    for field in named_fields(input, "Projection")? {
        let ident = field
            .ident
            .as_ref()
            .ok_or_else(|| syn::Error::new(field.span(), "expected a named field"))?;
        let mut column = ident.to_string();
        for attr in field.attrs.iter().filter(|a| a.path().is_ident("projection")) {
            attr.parse_nested_meta(|m| {
                if m.path.is_ident("column") {
                    column = m.value()?.parse::<LitStr>()?.value();
                    Ok(())
                } else {
                    Err(m.error("unsupported #[projection] option on a field; expected `column = \"...\"`"))
                }
            })?;
        }
        if !is_valid_ident(&column) {
            return Err(syn::Error::new(
                ident.span(),
                format!("Invalid column name `{column}`."),
            ));
        }
        let ty = &field.ty;
        mappings.push(quote! { #ident: row.try_get::<#ty>(#column)? });
        columns.push(column);
    }

    Ok(quote! {
        impl ::projectit_core::Projection for #struct_name {
            type Source = #entity;
            const COLUMNS: &'static [&'static str] = &[#(#columns),*];
            const SHAPE: ::projectit_core::ProjectionShape = ::projectit_core::ProjectionShape::Record;
            fn from_row(row: ::projectit_core::Row) -> ::projectit_core::RepoResult<Self> {
                Ok(Self {
                    #(#mappings),*
                })
            }
        }
    })
}

// --- `view` attribute macro ---

/// How a view accessor reads its column.
enum AccessorKind {
    Str,
    OptionStr,
    Owned,
}

fn accessor_kind(ty: &Type) -> AccessorKind {
    fn is_str_ref(ty: &Type) -> bool {
        matches!(ty, Type::Reference(r) if r.mutability.is_none()
            && matches!(&*r.elem, Type::Path(p) if p.path.is_ident("str")))
    }
    if is_str_ref(ty) {
        AccessorKind::Str
    } else if get_option_inner(ty).is_some_and(is_str_ref) {
        AccessorKind::OptionStr
    } else {
        AccessorKind::Owned
    }
}

#[proc_macro_attribute]
pub fn view(attr: TokenStream, item: TokenStream) -> TokenStream {
    let mut entity: Option<syn::Path> = None;
    let parser = syn::meta::parser(|m| {
        if m.path.is_ident("entity") {
            entity = Some(m.value()?.parse()?);
            Ok(())
        } else {
            Err(m.error("unsupported #[view] option; expected `entity = Type`"))
        }
    });
    parse_macro_input!(attr with parser);
    let item_trait = parse_macro_input!(item as ItemTrait);
    let Some(entity) = entity else {
        return syn::Error::new(item_trait.ident.span(), "`entity = Type` is required on #[view]")
            .into_compile_error()
            .into();
    };
    expand_view(&entity, &item_trait)
        .unwrap_or_else(syn::Error::into_compile_error)
        .into()
}

fn expand_view(entity: &syn::Path, item_trait: &ItemTrait) -> syn::Result<TokenStream2> {
    let trait_name = &item_trait.ident;
    let vis = &item_trait.vis;
    let proxy_name = Ident::new(&format!("{}Proxy", trait_name), trait_name.span());

    let mut columns = Vec::new();
    let mut checks = Vec::new();
    let mut accessors = Vec::new();
    for item in &item_trait.items {
        let TraitItem::Fn(f) = item else {
            return Err(syn::Error::new(
                item.span(),
                "#[view] traits may only declare accessor methods",
            ));
        };
        let sig = &f.sig;
        let takes_ref_self = sig.inputs.len() == 1
            && matches!(sig.inputs.first(), Some(syn::FnArg::Receiver(r)) if r.reference.is_some() && r.mutability.is_none());
        if !takes_ref_self || f.default.is_some() || sig.asyncness.is_some() {
            return Err(syn::Error::new(
                sig.span(),
                "view accessors must be `fn name(&self) -> T;` without a default body",
            ));
        }
        let syn::ReturnType::Type(_, ret) = &sig.output else {
            return Err(syn::Error::new(sig.span(), "view accessors must return a value"));
        };
        let column = sig.ident.to_string().to_snake_case();
        let (check, body) = match accessor_kind(ret) {
            AccessorKind::Str => (
                quote! { row.try_get::<::std::string::String>(#column)?; },
                quote! { self.row.get_str(#column).unwrap_or_default() },
            ),
            AccessorKind::OptionStr => (
                quote! { row.try_get::<::core::option::Option<::std::string::String>>(#column)?; },
                quote! { self.row.get_str(#column) },
            ),
            AccessorKind::Owned => (
                quote! { row.try_get::<#ret>(#column)?; },
                // Checked in `from_row`.
                quote! { self.row.try_get::<#ret>(#column).unwrap_or_default() },
            ),
        };
        checks.push(check);
        accessors.push(quote! { #sig { #body } });
        columns.push(column);
    }
    if columns.is_empty() {
        return Err(syn::Error::new(
            trait_name.span(),
            "#[view] traits must declare at least one accessor",
        ));
    }

    Ok(quote! {
        #item_trait

        /// Capability view over a fetched row.
        #[derive(Debug, Clone)]
        #vis struct #proxy_name {
            row: ::std::sync::Arc<::projectit_core::Row>,
        }

        impl #proxy_name {
            /// The backing row.
            pub fn row(&self) -> &::projectit_core::Row {
                &self.row
            }
        }

        impl #trait_name for #proxy_name {
            #(#accessors)*
        }

        impl ::projectit_core::Projection for #proxy_name {
            type Source = #entity;
            const COLUMNS: &'static [&'static str] = &[#(#columns),*];
            const SHAPE: ::projectit_core::ProjectionShape = ::projectit_core::ProjectionShape::View;
            fn from_row(row: ::projectit_core::Row) -> ::projectit_core::RepoResult<Self> {
                #(#checks)*
                Ok(Self { row: ::std::sync::Arc::new(row) })
            }
        }
    })
}

// --- `repository` attribute macro ---

/// Struct to parse a finder like `find_by_email: String`
struct Finder {
    name: Ident,
    ty: Type,
}

impl Parse for Finder {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        input.parse::<Token![:]>()?;
        let ty: Type = input.parse()?;
        Ok(Finder { name, ty })
    }
}

/// A declared query method: `name(arg: Type, ...) -> Projection`. The argument list may be
/// omitted when the method takes no parameters.
struct QueryDecl {
    name: Ident,
    params: Vec<(Ident, Type)>,
    output: Type,
}

impl Parse for QueryDecl {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        let mut params = Vec::new();
        if input.peek(syn::token::Paren) {
            let content;
            syn::parenthesized!(content in input);
            let args = Punctuated::<Finder, Token![,]>::parse_terminated(&content)?;
            params = args.into_iter().map(|f| (f.name, f.ty)).collect();
        }
        input.parse::<Token![->]>()?;
        let output: Type = input.parse()?;
        Ok(QueryDecl {
            name,
            params,
            output,
        })
    }
}

/// Struct for parsing the main macro arguments
struct RepositoryArgs {
    entity: Type,
    finders: Vec<Finder>,
    queries: Vec<QueryDecl>,
}

impl Parse for RepositoryArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut entity = None;
        let mut finders = Vec::new();
        let mut queries = Vec::new();

        while !input.is_empty() {
            let key: Ident = input.parse()?;
            match key.to_string().as_str() {
                "entity" => {
                    input.parse::<Token![=]>()?;
                    entity = Some(input.parse::<Type>()?);
                }
                "finders" => {
                    let content;
                    syn::parenthesized!(content in input);
                    finders.extend(Punctuated::<Finder, Token![,]>::parse_terminated(&content)?);
                }
                "queries" => {
                    let content;
                    syn::parenthesized!(content in input);
                    queries.extend(Punctuated::<QueryDecl, Token![,]>::parse_terminated(&content)?);
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "Unknown attribute; expected `entity`, `finders(...)` or `queries(...)`",
                    ))
                }
            }
            if !input.is_empty() {
                input.parse::<Token![,]>()?;
            }
        }
        Ok(RepositoryArgs {
            entity: entity
                .ok_or_else(|| syn::Error::new(input.span(), "`entity` is a required attribute"))?,
            finders,
            queries,
        })
    }
}

#[proc_macro_attribute]
pub fn repository(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as RepositoryArgs);
    let input_mod = parse_macro_input!(item as ItemMod);

    let mod_attrs = &input_mod.attrs;
    let mod_vis = &input_mod.vis;
    let mod_name = &input_mod.ident;
    let mod_items = input_mod
        .content
        .as_ref()
        .map(|(_, items)| items.as_slice())
        .unwrap_or_default();
    let entity_ty = &args.entity;

    let mut find_by_methods = Vec::new();
    let mut finder_checks = Vec::new();
    for finder in &args.finders {
        let method_name = &finder.name;
        let ty = &finder.ty;
        let finder_str = method_name.to_string();
        let field_name_str = finder_str.strip_prefix("find_by_").unwrap_or(&finder_str);
        let field_name_lit = LitStr::new(field_name_str, method_name.span());

        let ty_string = ty.to_token_stream().to_string();
        if !is_scalar(&ty_string) {
            let err_msg = format!(
                "Unsupported finder type: {}. Use String, i32, i64, f64, or bool.",
                ty_string
            );
            return syn::Error::new(ty.span(), err_msg).into_compile_error().into();
        }

        let method_lit = LitStr::new(&finder_str, method_name.span());
        finder_checks.push(quote! {
            ::projectit_core::QueryRegistry::<#entity_ty>::check_finder(#method_lit)?;
        });
        find_by_methods.push(quote! {
            pub async fn #method_name<S: ::projectit_core::Session + ?Sized>(
                &self,
                session: &S,
                value: &#ty,
            ) -> ::projectit_core::RepoResult<Vec<#entity_ty>> {
                let param = ::projectit_core::ParamValue::from(::core::clone::Clone::clone(value));
                self.inner.find_by_field(session, #field_name_lit, param).await
            }
        });
    }

    let mut registrations = Vec::new();
    let mut query_methods = Vec::new();
    for q in &args.queries {
        let method_name = &q.name;
        let method_lit = LitStr::new(&method_name.to_string(), method_name.span());
        let output = &q.output;
        let arity = q.params.len();
        let arg_names: Vec<_> = q.params.iter().map(|(n, _)| n).collect();
        let arg_tys: Vec<_> = q.params.iter().map(|(_, t)| t).collect();

        registrations.push(quote! {
            queries.register::<#output>(#method_lit, #arity)?;
        });
        query_methods.push(quote! {
            pub async fn #method_name<S: ::projectit_core::Session + ?Sized>(
                &self,
                session: &S,
                #(#arg_names: #arg_tys),*
            ) -> ::projectit_core::RepoResult<Vec<#output>> {
                self.queries
                    .execute::<#output, S>(
                        session,
                        #method_lit,
                        vec![#(::projectit_core::ParamValue::from(#arg_names)),*],
                    )
                    .await
            }
        });
    }
    let queries_binding = if registrations.is_empty() {
        quote! { let queries = ::projectit_core::QueryRegistry::new(); }
    } else {
        quote! { let mut queries = ::projectit_core::QueryRegistry::new(); }
    };

    let expanded = quote! {
        #(#mod_attrs)*
        #mod_vis mod #mod_name {
            use super::*;

            #(#mod_items)*

            #[derive(Debug)]
            pub struct Repository {
                inner: ::projectit_core::EntityRepository<#entity_ty>,
                queries: ::projectit_core::QueryRegistry<#entity_ty>,
            }

            impl Repository {
                /// Build the repository and resolve its finders and query methods. A method
                /// whose name or result type cannot be resolved fails here.
                pub fn new() -> ::projectit_core::RepoResult<Self> {
                    #(#finder_checks)*
                    #queries_binding
                    #(#registrations)*
                    Ok(Self {
                        inner: ::projectit_core::EntityRepository::new(),
                        queries,
                    })
                }

                pub fn queries(&self) -> &::projectit_core::QueryRegistry<#entity_ty> {
                    &self.queries
                }

                pub async fn save<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                    entity: #entity_ty,
                ) -> ::projectit_core::RepoResult<#entity_ty> {
                    self.inner.save(session, entity).await
                }

                pub async fn save_all<S, I>(
                    &self,
                    session: &S,
                    entities: I,
                ) -> ::projectit_core::RepoResult<Vec<#entity_ty>>
                where
                    S: ::projectit_core::Session + ?Sized,
                    I: ::core::iter::IntoIterator<Item = #entity_ty> + Send,
                    I::IntoIter: Send,
                {
                    self.inner.save_all(session, entities).await
                }

                pub async fn find_by_id<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                    id: i64,
                ) -> ::projectit_core::RepoResult<Option<#entity_ty>> {
                    self.inner.find_by_id(session, id).await
                }

                pub async fn exists_by_id<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                    id: i64,
                ) -> ::projectit_core::RepoResult<bool> {
                    self.inner.exists_by_id(session, id).await
                }

                pub async fn find_all<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                ) -> ::projectit_core::RepoResult<Vec<#entity_ty>> {
                    self.inner.find_all(session).await
                }

                pub async fn find_by_field<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                    field_name: &str,
                    value: ::projectit_core::ParamValue,
                ) -> ::projectit_core::RepoResult<Vec<#entity_ty>> {
                    self.inner.find_by_field(session, field_name, value).await
                }

                pub async fn count<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                ) -> ::projectit_core::RepoResult<u64> {
                    self.inner.count(session).await
                }

                pub async fn delete<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                    entity: &#entity_ty,
                ) -> ::projectit_core::RepoResult<()> {
                    self.inner.delete(session, entity).await
                }

                pub async fn delete_by_id<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                    id: i64,
                ) -> ::projectit_core::RepoResult<bool> {
                    self.inner.delete_by_id(session, id).await
                }

                pub async fn delete_all_in_batch<S: ::projectit_core::Session + ?Sized>(
                    &self,
                    session: &S,
                ) -> ::projectit_core::RepoResult<u64> {
                    self.inner.delete_all_in_batch(session).await
                }

                #(#find_by_methods)*

                #(#query_methods)*
            }
        }
    };

    TokenStream::from(expanded)
}
