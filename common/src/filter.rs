/// A filter that keeps some elements of the input, returning their indices
/// instead of copying them.
pub trait Filter<T: ?Sized> {
    /// The indices of the kept elements, in ascending order.
    fn filter_indices(&mut self, input: &T) -> Vec<usize>;

    /// Both the kept and the removed indices.
    fn filter_all_indices(&mut self, input: &T) -> (Vec<usize>, Vec<usize>) {
        (self.filter_indices(input), Vec::new())
    }
}

/// A filter that produces an approximation of its input (e.g. a downsampled
/// version) rather than a subset of it.
pub trait ApproxFilter<T: ?Sized> {
    type Output;

    fn filter(&mut self, input: &T) -> Self::Output;
}

impl<T, F: FnMut(&T) -> bool> Filter<[T]> for F {
    fn filter_indices(&mut self, input: &[T]) -> Vec<usize> {
        let mut indices = (0..input.len()).collect::<Vec<_>>();
        indices.retain(|&index| (self)(&input[index]));
        indices
    }

    fn filter_all_indices(&mut self, input: &[T]) -> (Vec<usize>, Vec<usize>) {
        let mut indices = (0..input.len()).collect::<Vec<_>>();
        let mut removed = Vec::with_capacity(indices.len());
        indices.retain(|&index| {
            let ret = (self)(&input[index]);
            if !ret {
                removed.push(index)
            }
            ret
        });
        (indices, removed)
    }
}
