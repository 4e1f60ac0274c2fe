use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{
    Data, DeriveInput, Fields, LitInt, LitStr, Token, Type, parse_macro_input, spanned::Spanned,
};

/// Implements `rustdbo::Persist` from the struct's fields.
///
/// Struct options: `#[dbo(surrogate_id = "...", version = "...", no_version, natural_id)]`.
///
/// Field options:
/// - `id`: natural primary key (the class then has no surrogate id)
/// - `name = "..."`, `size = N`, `skip`
/// - `belongs_to = "..."` on a `Ptr`, with `not_null`, `on_delete = "cascade" | "set null"`,
///   `on_update = "cascade" | "set null"`
/// - `has_many = "..."` or `many_to_many [= "..."]` (with `join_id = "..."`) on a `Collection`
/// - `has_one = "..."` on a `WeakPtr`
#[proc_macro_derive(Persist, attributes(dbo))]
pub fn derive_persist(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand_persist(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

#[derive(Default)]
struct ClassOptions {
    surrogate_id: Option<String>,
    version: Option<String>,
    no_version: bool,
    natural_id: bool,
}

#[derive(Default)]
struct FieldOptions {
    natural_id: bool,
    skip: bool,
    name: Option<String>,
    size: Option<i32>,
    belongs_to: Option<String>,
    has_many: Option<String>,
    many_to_many: Option<String>,
    join_id: Option<String>,
    has_one: Option<String>,
    not_null: bool,
    on_delete: Option<String>,
    on_update: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FieldType {
    Value,
    Ptr,
    WeakPtr,
    Collection,
}

fn expand_persist(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new(
            input.span(),
            "#[derive(Persist)] can only be used on structs",
        ));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new(
            input.span(),
            "#[derive(Persist)] requires a struct with named fields",
        ));
    };

    let class = parse_class_options(&input.attrs)?;

    let mut statements = Vec::new();
    let mut has_natural_id = false;
    for field in &fields.named {
        let Some(ident) = &field.ident else {
            continue;
        };
        let options = parse_field_options(&field.attrs)?;
        if options.skip {
            continue;
        }
        if options.natural_id {
            if has_natural_id {
                return Err(syn::Error::new(field.span(), "only one field can be the natural id"));
            }
            has_natural_id = true;
        }
        statements.push(expand_field(ident, &field.ty, &options, field.span())?);
    }

    if class.natural_id && !has_natural_id {
        return Err(syn::Error::new(
            input.span(),
            "#[dbo(natural_id)] requires a field marked #[dbo(id)]",
        ));
    }
    if has_natural_id && class.surrogate_id.is_some() {
        return Err(syn::Error::new(
            input.span(),
            "a class with a natural id cannot also declare surrogate_id",
        ));
    }

    let surrogate_id = if has_natural_id {
        quote!(None)
    } else {
        let column = class.surrogate_id.as_deref().unwrap_or("id");
        quote!(Some(#column))
    };
    let version = if class.no_version {
        quote!(None)
    } else {
        let column = class.version.as_deref().unwrap_or("version");
        quote!(Some(#column))
    };

    Ok(quote! {
        impl #impl_generics ::rustdbo::Persist for #name #ty_generics #where_clause {
            fn persist<A: ::rustdbo::Action>(&mut self, action: &mut A) -> ::rustdbo::Result<()> {
                #(#statements)*
                Ok(())
            }

            fn surrogate_id_field() -> Option<&'static str> {
                #surrogate_id
            }

            fn version_field() -> Option<&'static str> {
                #version
            }
        }
    })
}

fn expand_field(
    ident: &syn::Ident,
    ty: &Type,
    options: &FieldOptions,
    span: proc_macro2::Span,
) -> syn::Result<TokenStream2> {
    let column = options.name.clone().unwrap_or_else(|| ident.to_string());
    let size = options.size.unwrap_or(-1);

    match field_type(ty) {
        FieldType::Value => {
            if options.natural_id {
                Ok(quote!(::rustdbo::persist::id(action, &mut self.#ident, #column, #size)?;))
            } else {
                Ok(quote!(::rustdbo::persist::field_sized(action, &mut self.#ident, #column, #size)?;))
            }
        }
        FieldType::Ptr => {
            let name = options.belongs_to.clone().unwrap_or(column);
            let constraints = fk_constraints(options, span)?;
            Ok(quote!(::rustdbo::persist::belongs_to_with(action, &mut self.#ident, #name, #constraints)?;))
        }
        FieldType::WeakPtr => {
            let Some(join) = &options.has_one else {
                return Err(syn::Error::new(span, "a WeakPtr field needs #[dbo(has_one = \"...\")]"));
            };
            Ok(quote!(::rustdbo::persist::has_one(action, &mut self.#ident, #join)?;))
        }
        FieldType::Collection => match (&options.has_many, &options.many_to_many) {
            (Some(join), None) => Ok(quote! {
                ::rustdbo::persist::has_many(
                    action,
                    &mut self.#ident,
                    ::rustdbo::RelationType::ManyToOne,
                    #join,
                )?;
            }),
            (None, Some(join)) => match &options.join_id {
                Some(join_id) => {
                    let constraints = fk_constraints(options, span)?;
                    Ok(quote! {
                        ::rustdbo::persist::has_many_joined(action, &mut self.#ident, #join, #join_id, #constraints)?;
                    })
                }
                None => Ok(quote! {
                    ::rustdbo::persist::has_many(
                        action,
                        &mut self.#ident,
                        ::rustdbo::RelationType::ManyToMany,
                        #join,
                    )?;
                }),
            },
            _ => Err(syn::Error::new(
                span,
                "a Collection field needs exactly one of #[dbo(has_many = \"...\")] or #[dbo(many_to_many = \"...\")]",
            )),
        },
    }
}

fn field_type(ty: &Type) -> FieldType {
    let Type::Path(path) = ty else {
        return FieldType::Value;
    };
    match path.path.segments.last() {
        Some(segment) if segment.ident == "Ptr" => FieldType::Ptr,
        Some(segment) if segment.ident == "WeakPtr" => FieldType::WeakPtr,
        Some(segment) if segment.ident == "Collection" => FieldType::Collection,
        _ => FieldType::Value,
    }
}

fn fk_constraints(options: &FieldOptions, span: proc_macro2::Span) -> syn::Result<TokenStream2> {
    let mut flags = Vec::new();
    if options.not_null {
        flags.push(quote!(::rustdbo::FkConstraints::NOT_NULL));
    }
    if let Some(action) = &options.on_delete {
        flags.push(match action.as_str() {
            "cascade" => quote!(::rustdbo::FkConstraints::ON_DELETE_CASCADE),
            "set null" | "set_null" => quote!(::rustdbo::FkConstraints::ON_DELETE_SET_NULL),
            _ => return Err(syn::Error::new(span, "on_delete must be \"cascade\" or \"set null\"")),
        });
    }
    if let Some(action) = &options.on_update {
        flags.push(match action.as_str() {
            "cascade" => quote!(::rustdbo::FkConstraints::ON_UPDATE_CASCADE),
            "set null" | "set_null" => quote!(::rustdbo::FkConstraints::ON_UPDATE_SET_NULL),
            _ => return Err(syn::Error::new(span, "on_update must be \"cascade\" or \"set null\"")),
        });
    }

    if flags.is_empty() {
        Ok(quote!(::rustdbo::FkConstraints::NONE))
    } else {
        Ok(quote!(#(#flags)|*))
    }
}

fn parse_class_options(attrs: &[syn::Attribute]) -> syn::Result<ClassOptions> {
    let mut options = ClassOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("dbo") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("surrogate_id") {
                let lit: LitStr = meta.value()?.parse()?;
                options.surrogate_id = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("version") {
                let lit: LitStr = meta.value()?.parse()?;
                options.version = Some(lit.value());
                return Ok(());
            }

            if meta.path.is_ident("no_version") {
                options.no_version = true;
                return Ok(());
            }

            if meta.path.is_ident("natural_id") {
                options.natural_id = true;
                return Ok(());
            }

            Err(meta.error(
                "Unsupported #[dbo(...)] class option. Supported: surrogate_id = \"...\", version = \"...\", no_version, natural_id",
            ))
        })?;
    }

    if options.no_version && options.version.is_some() {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[dbo(no_version)] conflicts with #[dbo(version = \"...\")]",
        ));
    }

    Ok(options)
}

fn parse_field_options(attrs: &[syn::Attribute]) -> syn::Result<FieldOptions> {
    let mut options = FieldOptions::default();

    for attr in attrs {
        if !attr.path().is_ident("dbo") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                options.natural_id = true;
                return Ok(());
            }

            if meta.path.is_ident("skip") {
                options.skip = true;
                return Ok(());
            }

            if meta.path.is_ident("not_null") {
                options.not_null = true;
                return Ok(());
            }

            if meta.path.is_ident("size") {
                let lit: LitInt = meta.value()?.parse()?;
                options.size = Some(lit.base10_parse::<i32>()?);
                return Ok(());
            }

            // A bare `many_to_many` names the join table after both tables.
            if meta.path.is_ident("many_to_many") && !meta.input.peek(Token![=]) {
                options.many_to_many = Some(String::new());
                return Ok(());
            }

            let target = if meta.path.is_ident("name") {
                &mut options.name
            } else if meta.path.is_ident("belongs_to") {
                &mut options.belongs_to
            } else if meta.path.is_ident("has_many") {
                &mut options.has_many
            } else if meta.path.is_ident("many_to_many") {
                &mut options.many_to_many
            } else if meta.path.is_ident("join_id") {
                &mut options.join_id
            } else if meta.path.is_ident("has_one") {
                &mut options.has_one
            } else if meta.path.is_ident("on_delete") {
                &mut options.on_delete
            } else if meta.path.is_ident("on_update") {
                &mut options.on_update
            } else {
                return Err(meta.error(
                    "Unsupported #[dbo(...)] field option. Supported: id, skip, name, size, belongs_to, \
                     not_null, on_delete, on_update, has_many, many_to_many, join_id, has_one",
                ));
            };

            let lit: LitStr = meta.value()?.parse()?;
            *target = Some(lit.value());
            Ok(())
        })?;
    }

    if options.skip && options.natural_id {
        return Err(syn::Error::new(
            proc_macro2::Span::call_site(),
            "#[dbo(skip)] cannot be combined with #[dbo(id)]",
        ));
    }

    Ok(options)
}
