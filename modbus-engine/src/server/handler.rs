use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::exception::ExceptionCode;
use crate::server::image::ProcessImage;
use crate::types::{AddressRange, BitVector, Indexed, MaskWrite, UnitId};

/// Trait implemented by the user to process requests received from masters
///
/// Every operation defaults to [`ExceptionCode::IllegalFunction`].
pub trait RequestHandler: Send + 'static {
    /// Moves a handler into an `Arc<Mutex<Self>>` suitable for a [`ServerHandlerMap`]
    fn wrap(self) -> Arc<Mutex<Self>>
    where
        Self: Sized,
    {
        Arc::new(Mutex::new(self))
    }

    /// Read a range of coils
    fn read_coils(&self, _range: AddressRange) -> Result<BitVector, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read a range of discrete inputs
    fn read_discrete_inputs(&self, _range: AddressRange) -> Result<BitVector, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read a range of holding registers
    fn read_holding_registers(&self, _range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Read a range of input registers
    fn read_input_registers(&self, _range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write a single coil value
    fn write_single_coil(&mut self, _value: Indexed<bool>) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write a single register value
    fn write_single_register(&mut self, _value: Indexed<u16>) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write multiple coils
    fn write_multiple_coils(
        &mut self,
        _start: u16,
        _values: &BitVector,
    ) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Write multiple registers
    fn write_multiple_registers(
        &mut self,
        _start: u16,
        _values: &[u16],
    ) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }

    /// Modify a register with an AND and an OR mask
    fn mask_write_register(&mut self, _request: MaskWrite) -> Result<(), ExceptionCode> {
        Err(ExceptionCode::IllegalFunction)
    }
}

impl RequestHandler for ProcessImage {
    fn read_coils(&self, range: AddressRange) -> Result<BitVector, ExceptionCode> {
        ProcessImage::read_coils(self, range)
    }

    fn read_discrete_inputs(&self, range: AddressRange) -> Result<BitVector, ExceptionCode> {
        ProcessImage::read_discrete_inputs(self, range)
    }

    fn read_holding_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        self.read_registers(range)
    }

    fn read_input_registers(&self, range: AddressRange) -> Result<Vec<u16>, ExceptionCode> {
        self.read_registers(range)
    }

    fn write_single_coil(&mut self, value: Indexed<bool>) -> Result<(), ExceptionCode> {
        self.write_coils(value.index, &BitVector::from_iter([value.value]))
    }

    fn write_single_register(&mut self, value: Indexed<u16>) -> Result<(), ExceptionCode> {
        self.write_registers(value.index, &[value.value])
    }

    fn write_multiple_coils(&mut self, start: u16, values: &BitVector) -> Result<(), ExceptionCode> {
        self.write_coils(start, values)
    }

    fn write_multiple_registers(&mut self, start: u16, values: &[u16]) -> Result<(), ExceptionCode> {
        self.write_registers(start, values)
    }

    fn mask_write_register(&mut self, request: MaskWrite) -> Result<(), ExceptionCode> {
        ProcessImage::mask_write_register(self, request.address, request.and_mask, request.or_mask)
            .map(|_| ())
    }
}

/// A type that hides the underlying map implementation
/// and allows lookups of a [`RequestHandler`] from a [`UnitId`]
#[derive(Debug)]
pub struct ServerHandlerMap<T: RequestHandler> {
    handlers: BTreeMap<UnitId, Arc<Mutex<T>>>,
}

impl<T: RequestHandler> ServerHandlerMap<T> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Create a map with a single handler
    pub fn single(id: UnitId, handler: Arc<Mutex<T>>) -> Self {
        let mut map = Self::new();
        map.add(id, handler);
        map
    }

    /// Retrieve the handler for a unit id
    pub fn get(&self, id: UnitId) -> Option<&Arc<Mutex<T>>> {
        self.handlers.get(&id)
    }

    /// Add a handler, returning the one it replaces
    pub fn add(&mut self, id: UnitId, handler: Arc<Mutex<T>>) -> Option<Arc<Mutex<T>>> {
        self.handlers.insert(id, handler)
    }
}

impl<T: RequestHandler> Default for ServerHandlerMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RequestHandler> Clone for ServerHandlerMap<T> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_handler_rejects_every_function() {
        struct Nothing;
        impl RequestHandler for Nothing {}

        let mut handler = Nothing;
        let range = AddressRange::try_from(0, 1).unwrap();
        assert_eq!(handler.read_coils(range), Err(ExceptionCode::IllegalFunction));
        assert_eq!(
            handler.read_input_registers(range),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            handler.write_single_coil(Indexed::new(0, true)),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_eq!(
            handler.mask_write_register(MaskWrite::new(0, 0, 0)),
            Err(ExceptionCode::IllegalFunction)
        );
    }

    #[test]
    fn holding_and_input_reads_share_storage() {
        let mut image = ProcessImage::new(0, 0, 4);
        RequestHandler::write_single_register(&mut image, Indexed::new(2, 0xCAFE)).unwrap();
        let range = AddressRange::try_from(2, 1).unwrap();
        assert_eq!(image.read_holding_registers(range), Ok(vec![0xCAFE]));
        assert_eq!(image.read_input_registers(range), Ok(vec![0xCAFE]));
    }

    #[test]
    fn lookup_by_unit_id() {
        let map = ServerHandlerMap::single(UnitId::new(1), ProcessImage::new(1, 1, 1).wrap());
        assert!(map.get(UnitId::new(1)).is_some());
        assert!(map.get(UnitId::new(2)).is_none());
    }
}
