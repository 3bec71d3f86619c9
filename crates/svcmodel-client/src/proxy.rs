//! Typed proxies.
//!
//! A proxy is a thin struct over a [`ClientRuntimeChannel`]; each method
//! looks its operation up by name in the contract's [`DispatchTable`] and
//! hands the serialized parameters to [`ClientRuntimeChannel::process`].
//! Tables are built once per contract and shared through the [`ProxyCache`].
//!
//! The [`service_contract!`](crate::service_contract) macro writes the
//! contract marker type and its proxy:
//!
//! ```rust,ignore
//! use svcmodel_client::service_contract;
//!
//! service_contract! {
//!     /// Arithmetic service
//!     pub contract Calculator {
//!         name: "ICalculator",
//!         namespace: "http://example.org/calc",
//!         proxy: CalculatorClient,
//!         operations {
//!             call fn add(a: i32, b: i32) -> i32 => "Add" async(begin_add, end_add);
//!             call fn divide(a: f64, b: f64) -> f64 => "Divide" faults [MathFault => "MathFault"];
//!             oneway fn log(line: String) -> () => "Log";
//!         }
//!     }
//! }
//! ```

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use svcmodel_core::{Error, Result};

use crate::channel::ClientRuntimeChannel;
use crate::description::{ContractDescription, OperationDescription, OperationId};
use crate::formatter::{ClientMessageFormatter, DataContractFormatter};

/// A service contract with a generated proxy.
pub trait ServiceContract: 'static {
    /// Typed proxy over a runtime channel
    type Proxy: From<Arc<ClientRuntimeChannel>> + Send + Sync;

    /// Describe the contract
    fn describe() -> Result<ContractDescription>;
}

/// One entry of a [`DispatchTable`].
#[derive(Debug, Clone)]
pub struct OperationDispatch {
    /// Operation metadata
    pub description: OperationDescription,
    /// Parameter and reply mapping
    pub formatter: Arc<dyn ClientMessageFormatter>,
}

/// Operations of one contract, indexed by [`OperationId`].
#[derive(Debug, Clone)]
pub struct DispatchTable {
    contract: String,
    entries: Vec<OperationDispatch>,
    by_name: HashMap<String, OperationId>,
    by_action: HashMap<String, OperationId>,
}

impl DispatchTable {
    /// Table with the default formatter for every operation
    pub fn new(contract: &ContractDescription) -> Self {
        let formatter: Arc<dyn ClientMessageFormatter> = Arc::new(DataContractFormatter);
        let entries: Vec<_> = contract
            .operations
            .iter()
            .map(|op| OperationDispatch {
                description: op.clone(),
                formatter: formatter.clone(),
            })
            .collect();
        let by_name = entries
            .iter()
            .map(|e| (e.description.name.clone(), e.description.id))
            .collect();
        let by_action = entries
            .iter()
            .map(|e| (e.description.action.clone(), e.description.id))
            .collect();
        Self {
            contract: contract.name.clone(),
            entries,
            by_name,
            by_action,
        }
    }

    /// Contract name
    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Entry for `id`
    pub fn get(&self, id: OperationId) -> Option<&OperationDispatch> {
        self.entries.get(id.0)
    }

    /// Id of the operation named `name`
    pub fn id_of(&self, name: &str) -> Option<OperationId> {
        self.by_name.get(name).copied()
    }

    /// Entry for the operation named `name`
    pub fn find(&self, name: &str) -> Option<&OperationDispatch> {
        self.id_of(name).and_then(|id| self.get(id))
    }

    /// Entry whose request action is `action`
    pub fn find_by_action(&self, action: &str) -> Option<&OperationDispatch> {
        self.by_action.get(action).and_then(|id| self.get(*id))
    }

    /// All entries in id order
    pub fn iter(&self) -> impl Iterator<Item = &OperationDispatch> {
        self.entries.iter()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the contract has no operations
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the formatter of one operation
    pub fn set_formatter(
        &mut self,
        operation: &str,
        formatter: Arc<dyn ClientMessageFormatter>,
    ) -> Result<()> {
        let id = self.id_of(operation).ok_or_else(|| {
            Error::invalid_operation(format!(
                "contract {} has no operation named {}",
                self.contract, operation
            ))
        })?;
        self.entries[id.0].formatter = formatter;
        Ok(())
    }
}

/// Cache key of a dispatch table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyKey {
    /// Contract marker type
    pub type_id: TypeId,
    /// Contract namespace and name
    pub contract: String,
    /// Whether the table serves a duplex factory
    pub duplex: bool,
}

static DISPATCH_TABLES: LazyLock<DashMap<ProxyKey, Arc<DispatchTable>>> =
    LazyLock::new(DashMap::new);

/// Process-wide cache of dispatch tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyCache;

impl ProxyCache {
    /// The shared table for `C`, built from `contract` on first use
    pub fn dispatch_table<C: ServiceContract>(
        contract: &ContractDescription,
        duplex: bool,
    ) -> Arc<DispatchTable> {
        let key = ProxyKey {
            type_id: TypeId::of::<C>(),
            contract: contract.qualified_name(),
            duplex,
        };
        DISPATCH_TABLES
            .entry(key)
            .or_insert_with(|| {
                tracing::debug!(contract = %contract.name, duplex, "dispatch table built");
                Arc::new(DispatchTable::new(contract))
            })
            .value()
            .clone()
    }

    /// Number of cached tables
    pub fn len() -> usize {
        DISPATCH_TABLES.len()
    }
}

/// Declare a service contract and its typed proxy.
///
/// Each operation is `call` (request/reply) or `oneway`, takes serializable
/// parameters and returns a deserializable value (`()` for none). An
/// operation may add `async(begin_name, end_name)` to get a begin/end pair
/// and `faults [Detail => "DetailElement", ..]` to declare typed faults.
/// A duplex contract names its callback contract with `callback: Type,`.
#[macro_export]
macro_rules! service_contract {
    (@one_way call) => { false };
    (@one_way oneway) => { true };

    (@describe $kind:ident $op:literal ($($a:ident),*) -> $ret:ty
        [$($begin:ident)?]
        $(faults [$($fty:ty => $fname:literal),*])?
    ) => {{
        let op = $crate::OperationDescription::new($op)
            $(.parameter(::std::stringify!($a)))*
            .returns::<$ret>();
        let op = if $crate::service_contract!(@one_way $kind) { op.one_way() } else { op };
        $( let _ = ::std::stringify!($begin); let op = op.with_async_pattern(); )?
        $($( let op = op.fault::<$fty>($fname); )*)?
        op
    }};

    (@method $(#[$op_meta:meta])* $m:ident ($($a:ident: $t:ty),*) -> $ret:ty => $op:literal) => {
        $(#[$op_meta])*
        pub async fn $m(&self, $($a: $t),*) -> $crate::__private::Result<$ret> {
            let id = self.channel.operation_id($op)?;
            let parameters = ::std::vec![$($crate::__private::serde_json::to_value(&$a)?),*];
            self.channel.process(id, parameters).await?.return_as::<$ret>()
        }
    };

    (@method $(#[$op_meta:meta])* $m:ident ($($a:ident: $t:ty),*) -> $ret:ty => $op:literal
        async($begin:ident, $end:ident)
    ) => {
        $crate::service_contract!(@method $(#[$op_meta])* $m ($($a: $t),*) -> $ret => $op);

        #[doc = ::std::concat!("Start `", $op, "` in the background")]
        pub fn $begin(&self, $($a: $t),*) -> $crate::__private::Result<$crate::PendingCall> {
            let id = self.channel.operation_id($op)?;
            let parameters = ::std::vec![$($crate::__private::serde_json::to_value(&$a)?),*];
            Ok(self.channel.begin_process(id, parameters))
        }

        #[doc = ::std::concat!("Wait for a call started with `", ::std::stringify!($begin), "`")]
        pub async fn $end(&self, call: $crate::PendingCall) -> $crate::__private::Result<$ret> {
            self.channel.end_process(call).await?.return_as::<$ret>()
        }
    };

    (
        $(#[$meta:meta])*
        $vis:vis contract $C:ident {
            name: $name:literal,
            namespace: $ns:literal,
            proxy: $P:ident,
            $(callback: $cb:ty,)?
            operations {
                $(
                    $(#[$op_meta:meta])*
                    $kind:ident fn $m:ident ( $($a:ident : $t:ty),* $(,)? ) -> $ret:ty => $op:literal
                    $(async ($begin:ident, $end:ident))?
                    $(faults [ $($fty:ty => $fname:literal),* $(,)? ])?
                    ;
                )*
            }
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default)]
        $vis struct $C;

        impl $crate::ServiceContract for $C {
            type Proxy = $P;

            fn describe() -> $crate::__private::Result<$crate::ContractDescription> {
                let builder = $crate::ContractDescription::builder($name).namespace($ns)
                    $(.operation($crate::service_contract!(
                        @describe $kind $op ($($a),*) -> $ret
                        [$($begin)?]
                        $(faults [$($fty => $fname),*])?
                    )))*;
                $( let builder = builder.callback(<$cb as $crate::ServiceContract>::describe()?); )?
                builder.build()
            }
        }

        #[doc = ::std::concat!("Typed proxy for the `", $name, "` contract")]
        #[derive(Debug, Clone)]
        $vis struct $P {
            channel: ::std::sync::Arc<$crate::ClientRuntimeChannel>,
        }

        impl ::std::convert::From<::std::sync::Arc<$crate::ClientRuntimeChannel>> for $P {
            fn from(channel: ::std::sync::Arc<$crate::ClientRuntimeChannel>) -> Self {
                Self { channel }
            }
        }

        impl $P {
            /// The runtime channel behind this proxy
            pub fn channel(&self) -> &::std::sync::Arc<$crate::ClientRuntimeChannel> {
                &self.channel
            }

            $(
                $crate::service_contract!(
                    @method $(#[$op_meta])* $m ($($a: $t),*) -> $ret => $op
                    $(async($begin, $end))?
                );
            )*
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::OperationDescription;

    #[derive(Debug, serde::Deserialize)]
    struct Busy {
        #[allow(dead_code)]
        retry_after: u32,
    }

    crate::service_contract! {
        /// Test contract
        pub contract Inventory {
            name: "IInventory",
            namespace: "urn:stock",
            proxy: InventoryClient,
            operations {
                /// Count items
                call fn count(sku: String) -> u32 => "Count" async(begin_count, end_count);
                call fn reserve(sku: String, qty: u32,) -> bool => "Reserve" faults [Busy => "Busy"];
                oneway fn touch(sku: String) -> () => "Touch";
            }
        }
    }

    #[test]
    fn macro_describes_operations_in_order() {
        let contract = Inventory::describe().unwrap();
        assert_eq!(contract.name, "IInventory");
        let names: Vec<_> = contract.operations.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["Count", "Reserve", "Touch"]);

        let count = &contract.operations[0];
        assert!(count.has_async_pattern);
        assert_eq!(count.inputs().count(), 1);
        assert_eq!(count.return_type, Some("u32"));

        let reserve = &contract.operations[1];
        assert_eq!(reserve.parameters.len(), 2);
        assert_eq!(reserve.fault_contracts.len(), 1);
        assert_eq!(reserve.fault_contracts[0].action, "urn:stock/IInventory/ReserveBusyFault");

        let touch = &contract.operations[2];
        assert!(touch.is_one_way);
        assert_eq!(touch.return_type, None);
    }

    #[test]
    fn dispatch_tables_are_cached() {
        let contract = Inventory::describe().unwrap();
        let a = ProxyCache::dispatch_table::<Inventory>(&contract, false);
        let b = ProxyCache::dispatch_table::<Inventory>(&contract, false);
        assert!(Arc::ptr_eq(&a, &b));
        let duplex = ProxyCache::dispatch_table::<Inventory>(&contract, true);
        assert!(!Arc::ptr_eq(&a, &duplex));

        assert_eq!(a.id_of("Reserve"), Some(OperationId(1)));
        assert_eq!(
            a.find_by_action("urn:stock/IInventory/Touch").unwrap().description.name,
            "Touch"
        );
        assert!(a.find("Missing").is_none());
    }

    #[test]
    fn formatter_override_is_per_operation() {
        let contract = ContractDescription::builder("IOne")
            .operation(OperationDescription::new("A"))
            .build()
            .unwrap();
        let mut table = DispatchTable::new(&contract);
        assert!(table.set_formatter("A", Arc::new(DataContractFormatter)).is_ok());
        assert!(matches!(
            table.set_formatter("B", Arc::new(DataContractFormatter)),
            Err(Error::InvalidOperation(_))
        ));
    }
}
