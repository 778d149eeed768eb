/// Marker trait for messages a saga sends or receives.
///
/// Implement this for every command, event, reply and timeout type that
/// appears in a test. Messages must be `'static` because recorded outbound
/// operations are stored type-erased and downcast back during matching.
///
/// Inbound messages that the fixture synthesizes (the `when*` methods)
/// additionally require [`Default`]; the fixture default-constructs the
/// message and applies the caller's closure to it.
///
/// # Example
///
/// ```rust
/// use sagatest::Message;
///
/// #[derive(Default)]
/// struct PlaceOrder {
///     amount: u32,
/// }
///
/// impl Message for PlaceOrder {}
/// ```
pub trait Message: 'static {}

/// Short, path-free name of a message type, used in failure descriptions.
///
/// `my_crate::orders::OrderAccepted` reports as `OrderAccepted`; generic
/// arguments are kept as written.
pub(crate) fn short_type_name<M: 'static>() -> &'static str {
    let full = std::any::type_name::<M>();
    // Strip the module path of the outermost type only; anything after a
    // generic bracket stays untouched.
    match full.find('<') {
        Some(bracket) => {
            let head = &full[..bracket];
            match head.rfind("::") {
                Some(sep) => &full[sep + 2..],
                None => full,
            }
        }
        None => match full.rfind("::") {
            Some(sep) => &full[sep + 2..],
            None => full,
        },
    }
}
