//! Type registry for dynamic channel creation

use super::errors::BuildError;
use super::sender::{ChannelMessage, Sender};
use crossbeam_channel::{Sender as CrossbeamSender, bounded};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

type ErasedEnd = Box<dyn Any + Send>;
type ChannelCreatorFn = Box<dyn Fn(usize) -> (ErasedEnd, ErasedEnd) + Send + Sync>;
type OutputWrapperFn = Box<dyn Fn(Vec<ErasedEnd>) -> Result<ErasedEnd, BuildError> + Send + Sync>;

pub(crate) struct TypeRegistry {
    channel_creators: HashMap<TypeId, ChannelCreatorFn>,
    output_wrappers: HashMap<TypeId, OutputWrapperFn>,
}

impl TypeRegistry {
    fn new() -> Self {
        Self {
            channel_creators: HashMap::new(),
            output_wrappers: HashMap::new(),
        }
    }

    fn register<T: 'static + Send + Clone>(&mut self) {
        let type_id = TypeId::of::<T>();

        self.channel_creators.insert(
            type_id,
            Box::new(|buffer_size: usize| {
                let (tx, rx) = bounded::<ChannelMessage<T>>(buffer_size);
                (Box::new(tx) as ErasedEnd, Box::new(rx) as ErasedEnd)
            }),
        );

        // Collects every connection leaving one output into a single broadcast Sender
        self.output_wrappers.insert(
            type_id,
            Box::new(move |senders: Vec<ErasedEnd>| {
                let typed_senders = senders
                    .into_iter()
                    .map(|sender| {
                        sender
                            .downcast::<CrossbeamSender<ChannelMessage<T>>>()
                            .map(|tx| *tx)
                            .map_err(|_| BuildError::SenderMismatch(type_id))
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                Ok(Box::new(Sender::new(typed_senders)) as ErasedEnd)
            }),
        );
    }

    pub(crate) fn create_channel(
        &self,
        type_id: TypeId,
        buffer_size: usize,
    ) -> Result<(ErasedEnd, ErasedEnd), BuildError> {
        self.channel_creators
            .get(&type_id)
            .map(|creator| creator(buffer_size))
            .ok_or(BuildError::UnregisteredType(type_id))
    }

    pub(crate) fn wrap_output(
        &self,
        type_id: TypeId,
        senders: Vec<ErasedEnd>,
    ) -> Result<ErasedEnd, BuildError> {
        self.output_wrappers
            .get(&type_id)
            .ok_or(BuildError::UnregisteredType(type_id))?(senders)
    }
}

lazy_static::lazy_static! {
    pub(crate) static ref TYPE_REGISTRY: Mutex<TypeRegistry> = {
        let mut registry = TypeRegistry::new();

        use crate::runtime::SampleBatch;
        registry.register::<SampleBatch>();

        Mutex::new(registry)
    };
}

/// Register a custom type for use in pipelines
/// Call this before building pipelines that use custom types
pub fn register_type<T: 'static + Send + Clone>() {
    TYPE_REGISTRY
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .register::<T>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Marker;

    #[test]
    fn test_unregistered_type_rejected() {
        let registry = TYPE_REGISTRY.lock().unwrap();
        assert!(matches!(
            registry.create_channel(TypeId::of::<std::cell::Cell<u8>>(), 1),
            Err(BuildError::UnregisteredType(_))
        ));
    }

    #[test]
    fn test_registered_type_wraps_senders() {
        register_type::<Marker>();
        let registry = TYPE_REGISTRY.lock().unwrap();
        let (tx, _rx) = registry.create_channel(TypeId::of::<Marker>(), 4).unwrap();
        let wrapped = registry
            .wrap_output(TypeId::of::<Marker>(), vec![tx])
            .unwrap();
        let sender = wrapped.downcast_ref::<Sender<Marker>>().unwrap();
        assert_eq!(sender.num_destinations(), 1);
    }
}
